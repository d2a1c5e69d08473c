//! Rate tables
//!
//! Pure pricing functions over [`RateConfig`]. Toll-free classification is an
//! NPA lookup; per-second mode prices fractional minutes so sub-cent calls do
//! not round to zero.

use rust_decimal::Decimal;
use voxway_core::phone;

use crate::config::RateConfig;

const TOLLFREE_NPAS: [&str; 7] = ["800", "833", "844", "855", "866", "877", "888"];

/// Is this a NANPA toll-free number?
pub fn is_tollfree(number: &str) -> bool {
    phone::npa(number)
        .map(|npa| TOLLFREE_NPAS.contains(&npa.as_str()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRate {
    pub price: Decimal,
    pub is_tollfree: bool,
    /// Billed units: minutes under round-up mode, else seconds.
    pub units: i64,
}

fn price_for(billsec: i64, rate_per_min: Decimal, round_up: bool) -> (Decimal, i64) {
    if billsec <= 0 {
        return (Decimal::ZERO, 0);
    }
    if round_up {
        let units = (billsec + 59) / 60;
        ((Decimal::from(units) * rate_per_min).round_dp(8), units)
    } else {
        let price = (Decimal::from(billsec) * rate_per_min / Decimal::from(60)).round_dp(8);
        (price, billsec)
    }
}

/// Price an inbound AI call.
pub fn rate_inbound_call(rates: &RateConfig, to_number: &str, billsec: i64) -> CallRate {
    let tollfree = is_tollfree(to_number);
    let rate_per_min = if tollfree {
        rates.inbound_tollfree_rate_per_min
    } else {
        rates.inbound_local_rate_per_min
    };
    let (price, units) = price_for(billsec, rate_per_min, rates.inbound_round_up_to_minute);
    CallRate {
        price,
        is_tollfree: tollfree,
        units,
    }
}

/// Price an outbound dialer call.
pub fn rate_outbound_dialer(rates: &RateConfig, billsec: i64) -> CallRate {
    let (price, units) = price_for(billsec, rates.dialer_rate_per_min, rates.dialer_round_up_to_minute);
    CallRate {
        price,
        is_tollfree: false,
        units,
    }
}

/// Monthly fee for a number, by NPA tier.
pub fn monthly_number_fee(rates: &RateConfig, phone_number: &str) -> Decimal {
    if is_tollfree(phone_number) {
        rates.did_tollfree_monthly_fee
    } else {
        rates.did_local_monthly_fee
    }
}

/// The larger of the two monthly tiers, used as the purchase gate.
pub fn max_monthly_fee(rates: &RateConfig) -> Decimal {
    rates.did_local_monthly_fee.max(rates.did_tollfree_monthly_fee)
}

/// Total charge for a physical mail piece: provider estimate plus flat and
/// percentage markup.
pub fn physical_mail_cost(rates: &RateConfig, provider_estimate: Decimal) -> Decimal {
    (provider_estimate + rates.mail_markup_flat + rates.mail_markup_percent * provider_estimate)
        .round_dp(8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn rates(round_up: bool) -> RateConfig {
        RateConfig {
            did_local_monthly_fee: dec!(2.00),
            did_tollfree_monthly_fee: dec!(4.00),
            inbound_local_rate_per_min: dec!(0.025),
            inbound_tollfree_rate_per_min: dec!(0.03),
            inbound_round_up_to_minute: round_up,
            dialer_rate_per_min: dec!(0.05),
            dialer_round_up_to_minute: round_up,
            email_cost: dec!(0.10),
            sms_cost: dec!(0.05),
            meeting_link_cost: dec!(0.25),
            mail_markup_flat: dec!(0.50),
            mail_markup_percent: dec!(0.15),
        }
    }

    #[test]
    fn test_tollfree_npas() {
        assert!(is_tollfree("+18005551212"));
        assert!(is_tollfree("+18335551212"));
        assert!(is_tollfree("8885551212"));
        assert!(!is_tollfree("+14155551212"));
        assert!(!is_tollfree("+442071838750"));
    }

    #[test]
    fn test_per_second_local_42s() {
        // 42s at $0.025/min = $0.0175
        let rate = rate_inbound_call(&rates(false), "+14155551212", 42);
        assert!(!rate.is_tollfree);
        assert_eq!(rate.units, 42);
        assert_eq!(rate.price, dec!(0.0175));
    }

    #[test]
    fn test_tollfree_minute_rounding_61s() {
        // 61s rounds to 2 minutes at $0.03/min = $0.06
        let rate = rate_inbound_call(&rates(true), "+18335551212", 61);
        assert!(rate.is_tollfree);
        assert_eq!(rate.units, 2);
        assert_eq!(rate.price, dec!(0.06));
    }

    #[test]
    fn test_exact_minute_does_not_round_up_extra() {
        let rate = rate_inbound_call(&rates(true), "+14155551212", 120);
        assert_eq!(rate.units, 2);
        assert_eq!(rate.price, dec!(0.05));
    }

    #[test]
    fn test_zero_billsec_is_free() {
        let rate = rate_inbound_call(&rates(false), "+14155551212", 0);
        assert_eq!(rate.price, Decimal::ZERO);
        assert_eq!(rate.units, 0);
    }

    #[test]
    fn test_sub_cent_does_not_round_to_zero() {
        // 1s at $0.025/min
        let rate = rate_inbound_call(&rates(false), "+14155551212", 1);
        assert!(rate.price > Decimal::ZERO);
        assert_eq!(rate.price, dec!(0.00041667));
    }

    #[test]
    fn test_outbound_dialer_per_second() {
        let rate = rate_outbound_dialer(&rates(false), 90);
        assert_eq!(rate.price, dec!(0.075));
    }

    #[test]
    fn test_monthly_fee_tiers() {
        let r = rates(false);
        assert_eq!(monthly_number_fee(&r, "+18005551212"), dec!(4.00));
        assert_eq!(monthly_number_fee(&r, "+14155551212"), dec!(2.00));
        assert_eq!(max_monthly_fee(&r), dec!(4.00));
    }

    #[test]
    fn test_physical_mail_markup() {
        // 1.00 + 0.50 flat + 15% of 1.00 = 1.65
        assert_eq!(physical_mail_cost(&rates(false), dec!(1.00)), dec!(1.65));
    }
}
