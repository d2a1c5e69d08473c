//! Scenario tests for the billing core
//!
//! End-to-end money paths exercised through the pure pieces: rating,
//! transition math, claim arithmetic, and the cancellation windows.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::billing::rates;
use crate::calls::reducer::{reduce_transition, CallTimes, EventKind};
use crate::config::RateConfig;
use crate::dialer::scheduler::claimable;
use crate::numbers::lifecycle::next_billed_to;
use crate::types::CallStatus;

fn rate_config() -> RateConfig {
    RateConfig {
        did_local_monthly_fee: dec!(10.20),
        did_tollfree_monthly_fee: dec!(12.00),
        inbound_local_rate_per_min: dec!(0.025),
        inbound_tollfree_rate_per_min: dec!(0.03),
        inbound_round_up_to_minute: false,
        dialer_rate_per_min: dec!(0.05),
        dialer_round_up_to_minute: false,
        email_cost: dec!(1.00),
        sms_cost: dec!(0.05),
        meeting_link_cost: dec!(0.25),
        mail_markup_flat: dec!(0.50),
        mail_markup_percent: dec!(0.15),
    }
}

#[test]
fn scenario_per_second_inbound_billing_local() {
    // balance $1.00, local $0.025/min, connect at t=0, stop at t=42s
    let start = Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap();
    let call = CallTimes {
        status: CallStatus::Connected,
        time_start: start,
        time_connect: Some(start),
        time_end: None,
    };
    let stop = start + chrono::Duration::seconds(42);

    let transition = reduce_transition(&call, EventKind::Stopped, stop).unwrap();
    assert_eq!(transition.status, CallStatus::Completed);
    assert_eq!(transition.billsec, Some(42));

    let rate = rates::rate_inbound_call(&rate_config(), "+14155551212", 42);
    assert_eq!(rate.price, dec!(0.0175));

    let balance_before = dec!(1.00);
    let balance_after = balance_before - rate.price;
    assert_eq!(balance_after, dec!(0.9825));
}

#[test]
fn scenario_tollfree_minute_rounding() {
    // NPA 833, $0.03/min, round_up=true, billsec=61 => 2 units, $0.06
    let mut config = rate_config();
    config.inbound_round_up_to_minute = true;

    let rate = rates::rate_inbound_call(&config, "+18335550100", 61);
    assert!(rate.is_tollfree);
    assert_eq!(rate.units, 2);
    assert_eq!(rate.price, dec!(0.06));
}

#[test]
fn scenario_missed_call_is_free() {
    // dialin.stopped arrives without .connected
    let start = Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap();
    let call = CallTimes {
        status: CallStatus::PipecatStarted,
        time_start: start,
        time_connect: None,
        time_end: None,
    };

    let transition =
        reduce_transition(&call, EventKind::Stopped, start + chrono::Duration::seconds(25)).unwrap();
    assert_eq!(transition.status, CallStatus::Missed);
    assert_eq!(transition.billsec, Some(0));

    // billsec 0 prices to zero: nothing to charge.
    let rate = rates::rate_inbound_call(&rate_config(), "+14155551212", 0);
    assert_eq!(rate.price, Decimal::ZERO);
}

#[test]
fn scenario_monthly_fee_insufficient_funds() {
    // balance $1.00 vs local monthly fee $10.20: the cycle cannot be charged
    // and the number enters the grace window.
    let config = rate_config();
    let balance = dec!(1.00);
    let fee = rates::monthly_number_fee(&config, "+14155551212");
    assert_eq!(fee, dec!(10.20));
    assert!(balance < fee);

    // Strict-mode debit would overdraw: balance + (-fee) < 0.
    assert!(balance - fee < Decimal::ZERO);

    // Due period derives from the purchase date.
    let created = Utc.with_ymd_and_hms(2026, 5, 10, 9, 0, 0).unwrap();
    let due = next_billed_to(None, created);
    assert_eq!(due, Utc.with_ymd_and_hms(2026, 6, 10, 9, 0, 0).unwrap());

    // Grace window: 3 days out.
    let now = Utc.with_ymd_and_hms(2026, 6, 10, 12, 0, 0).unwrap();
    let cancel_after = now + chrono::Duration::days(3);
    assert_eq!(cancel_after, Utc.with_ymd_and_hms(2026, 6, 13, 12, 0, 0).unwrap());
}

#[test]
fn scenario_dialer_concurrency_cap() {
    // concurrency_limit=3, 10 pending, 0 in progress: one tick claims 3.
    assert_eq!(claimable(3, 0), 3);
    // Next tick with 3 still in flight claims 0.
    assert_eq!(claimable(3, 3), 0);
}

#[test]
fn scenario_charge_then_refund_restores_balance() {
    // send-email cost $1.00 against a $5.00 balance; the SMTP failure path
    // refunds the full charge.
    let config = rate_config();
    let cost = config.email_cost;

    let balance = dec!(5.00);
    let after_charge = balance - cost;
    assert_eq!(after_charge, dec!(4.00));

    let after_refund = after_charge + cost;
    assert_eq!(after_refund, balance);
}

#[test]
fn scenario_physical_mail_markup_over_estimate() {
    // $1.07 provider estimate, $0.50 flat, 15% pct.
    let total = rates::physical_mail_cost(&rate_config(), dec!(1.07));
    assert_eq!(total, dec!(1.7305));
}

#[test]
fn scenario_redelivered_stop_event_changes_nothing() {
    let start = Utc.with_ymd_and_hms(2026, 7, 1, 10, 0, 0).unwrap();
    let finished = CallTimes {
        status: CallStatus::Completed,
        time_start: start,
        time_connect: Some(start),
        time_end: Some(start + chrono::Duration::seconds(42)),
    };

    // The provider retries the webhook; the reducer must not move the row.
    assert!(reduce_transition(
        &finished,
        EventKind::Stopped,
        start + chrono::Duration::seconds(90)
    )
    .is_none());
}
