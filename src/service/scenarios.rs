//! End-to-end checkout and fulfillment flows over the in-memory stores.

#![allow(clippy::panic)]

use std::collections::HashSet;
use std::time::Duration;

use super::NotificationOutcome;
use super::test_support::{RecordingSender, Shop};
use crate::error::GatewayError;
use crate::hold_store::HoldStore;

#[tokio::test]
async fn last_unit_goes_to_exactly_one_of_two_buyers() {
    let shop = Shop::open().await;
    let ga = shop.ticket_type("General", 10, 9).await;

    let a = shop.coordinator.clone();
    let b = shop.coordinator.clone();
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { a.checkout(Shop::command(&[(ga, 1)])).await }),
        tokio::spawn(async move { b.checkout(Shop::command(&[(ga, 1)])).await }),
    );
    let (Ok(ra), Ok(rb)) = (ra, rb) else {
        panic!("checkout task panicked");
    };

    let successes = [&ra, &rb].iter().filter(|r| r.is_ok()).count();
    let conflicts = [&ra, &rb]
        .iter()
        .filter(|r| matches!(r, Err(GatewayError::InsufficientInventory(_))))
        .count();
    assert_eq!((successes, conflicts), (1, 1));
    assert_eq!(shop.held(ga).await, 1);
}

#[tokio::test]
async fn short_line_fails_the_whole_cart() {
    let shop = Shop::open().await;
    let five = shop.ticket_type("Stalls", 10, 0).await;
    let six = shop.ticket_type("Circle", 4, 4).await;

    let result = shop
        .coordinator
        .checkout(Shop::command(&[(five, 2), (six, 1)]))
        .await;
    assert!(matches!(result, Err(GatewayError::InsufficientInventory(id)) if id == six));
    assert_eq!(shop.held(five).await, 0);
    assert_eq!(shop.held(six).await, 0);
}

#[tokio::test]
async fn one_left_and_none_left_holds_neither() {
    let shop = Shop::open().await;
    let a = shop.ticket_type("A", 5, 4).await;
    let b = shop.ticket_type("B", 5, 5).await;
    let Ok(before) = shop.availability.availability(a).await else {
        panic!("availability failed");
    };

    let result = shop.coordinator.checkout(Shop::command(&[(a, 1), (b, 1)])).await;
    assert!(matches!(result, Err(GatewayError::InsufficientInventory(_))));

    let Ok(after) = shop.availability.availability(a).await else {
        panic!("availability failed");
    };
    assert_eq!(before, after);
    assert_eq!(after.available, 1);
}

#[tokio::test]
async fn paid_checkout_sells_and_clears_the_reservation() {
    let shop = Shop::open().await;
    let ga = shop.ticket_type("General", 10, 2).await;
    let receipt = shop.checkout(&[(ga, 3)]).await;

    assert!(matches!(
        shop.pay(&receipt.session_id).await,
        Ok(NotificationOutcome::Fulfilled { tickets_issued: 3, .. })
    ));
    assert_eq!(shop.row(ga).await.sold_quantity, 5);

    let tickets = shop.ledger.tickets_for(receipt.purchase_id).await;
    let codes: HashSet<&str> = tickets.iter().map(|t| t.code.as_str()).collect();
    assert_eq!(tickets.len(), 3);
    assert_eq!(codes.len(), 3);

    assert_eq!(shop.holds.reservation(receipt.reservation_id).await.ok(), Some(None));
    assert_eq!(shop.held(ga).await, 0);
}

#[tokio::test]
async fn redelivered_completion_changes_nothing() {
    let shop = Shop::open().await;
    let ga = shop.ticket_type("General", 10, 0).await;
    let receipt = shop.checkout(&[(ga, 2)]).await;
    assert!(shop.pay(&receipt.session_id).await.is_ok());

    let again = shop.pay(&receipt.session_id).await;
    assert_eq!(
        again.ok(),
        Some(NotificationOutcome::AlreadyFulfilled {
            purchase_id: receipt.purchase_id
        })
    );
    assert_eq!(shop.row(ga).await.sold_quantity, 2);
    assert_eq!(shop.ledger.tickets_for(receipt.purchase_id).await.len(), 2);
    assert_eq!(shop.confirmations.sent.lock().await.len(), 1);
}

#[tokio::test]
async fn concurrent_duplicate_deliveries_fulfil_once() {
    let shop = Shop::open().await;
    let ga = shop.ticket_type("General", 10, 0).await;
    let receipt = shop.checkout(&[(ga, 2)]).await;
    let (payload, signature) = shop.completion(&receipt.session_id).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let reconciler = shop.reconciler.clone();
        let payload = payload.clone();
        let signature = signature.clone();
        handles.push(tokio::spawn(async move {
            reconciler
                .handle_notification(&payload, Some(&signature))
                .await
        }));
    }

    let mut fulfilled = 0;
    for handle in handles {
        match handle.await {
            Ok(Ok(NotificationOutcome::Fulfilled { .. })) => fulfilled += 1,
            Ok(Ok(NotificationOutcome::AlreadyFulfilled { .. })) => {}
            other => panic!("unexpected delivery result {other:?}"),
        }
    }
    assert_eq!(fulfilled, 1);
    assert_eq!(shop.row(ga).await.sold_quantity, 2);
    assert_eq!(shop.ledger.tickets_for(receipt.purchase_id).await.len(), 2);
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell() {
    const TOTAL: u32 = 7;
    let shop = Shop::open().await;
    let ga = shop.ticket_type("General", TOTAL, 0).await;

    let mut handles = Vec::new();
    for n in 0..40_u32 {
        let coordinator = shop.coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator
                .checkout(Shop::command(&[(ga, 1 + n % 2)]))
                .await
        }));
    }

    let mut receipts = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(Ok(receipt)) => receipts.push(receipt),
            Ok(Err(GatewayError::InsufficientInventory(_))) => {}
            other => panic!("unexpected checkout result {other:?}"),
        }
    }
    let held = shop.held(ga).await;
    assert!(held <= TOTAL);

    for receipt in &receipts {
        assert!(shop.pay(&receipt.session_id).await.is_ok());
        let row = shop.row(ga).await;
        assert!(row.sold_quantity + shop.held(ga).await <= TOTAL);
    }
    let row = shop.row(ga).await;
    assert_eq!(row.sold_quantity, held);
    assert_eq!(shop.held(ga).await, 0);
}

#[tokio::test]
async fn release_returns_exactly_the_reserved_units() {
    let shop = Shop::open().await;
    let a = shop.ticket_type("A", 20, 0).await;
    let b = shop.ticket_type("B", 20, 0).await;

    // Someone else's hold stays in place throughout.
    let _other = shop.checkout(&[(a, 1), (b, 2)]).await;
    let (pre_a, pre_b) = (shop.held(a).await, shop.held(b).await);

    shop.payments.set_failing(true);
    assert!(shop.coordinator.checkout(Shop::command(&[(a, 3), (b, 4)])).await.is_err());
    assert_eq!((shop.held(a).await, shop.held(b).await), (pre_a, pre_b));

    shop.payments.set_failing(false);
    let paid = shop.checkout(&[(a, 3), (b, 4)]).await;
    assert_eq!((shop.held(a).await, shop.held(b).await), (pre_a + 3, pre_b + 4));
    assert!(shop.pay(&paid.session_id).await.is_ok());
    assert_eq!((shop.held(a).await, shop.held(b).await), (pre_a, pre_b));
}

#[tokio::test]
async fn lapsed_reservations_do_not_block_new_checkouts() {
    let shop = Shop::with_sender(RecordingSender::default(), Duration::from_millis(200)).await;
    let ga = shop.ticket_type("General", 3, 0).await;
    let _abandoned = shop.checkout(&[(ga, 3)]).await;
    assert!(matches!(
        shop.coordinator.checkout(Shop::command(&[(ga, 1)])).await,
        Err(GatewayError::InsufficientInventory(_))
    ));

    tokio::time::sleep(Duration::from_millis(400)).await;

    let Ok(view) = shop.availability.availability(ga).await else {
        panic!("availability failed");
    };
    assert_eq!((view.held, view.available), (0, 3));
    assert!(shop.coordinator.checkout(Shop::command(&[(ga, 3)])).await.is_ok());
}
