use crate::{
    enums::{PaymentRecordStatus, PaymentStatus, RefundStatus},
    models::PaymentEntity,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedPayment {
    pub status: PaymentStatus,
    /// Set only when a completed payment decided the status.
    pub payment_method: Option<String>,
}

/// Derives an appointment's payment status from its ledger rows.
///
/// First match wins: no rows → pending; any completed → paid; all failed →
/// failed; all cancelled → cancelled; anything else → pending.
pub fn derive_payment_status<'a>(
    payments: impl IntoIterator<Item = (PaymentRecordStatus, &'a str)>,
) -> DerivedPayment {
    let mut count = 0usize;
    let mut failed = 0usize;
    let mut cancelled = 0usize;
    let mut completed_method = None;

    for (status, method) in payments {
        count += 1;
        match status {
            PaymentRecordStatus::Completed => {
                if completed_method.is_none() {
                    completed_method = Some(method.to_string());
                }
            }
            PaymentRecordStatus::Failed => failed += 1,
            PaymentRecordStatus::Cancelled => cancelled += 1,
            PaymentRecordStatus::Pending => {}
        }
    }

    let status = if count == 0 {
        PaymentStatus::Pending
    } else if completed_method.is_some() {
        PaymentStatus::Paid
    } else if failed == count {
        PaymentStatus::Failed
    } else if cancelled == count {
        PaymentStatus::Cancelled
    } else {
        PaymentStatus::Pending
    };

    DerivedPayment {
        status,
        payment_method: completed_method,
    }
}

/// Derivation for a whole appointment: a refunded appointment stays refunded
/// whatever the ledger says.
pub fn resolve(payments: &[PaymentEntity], refund_status: Option<RefundStatus>) -> DerivedPayment {
    if refund_status == Some(RefundStatus::Refunded) {
        return DerivedPayment {
            status: PaymentStatus::Refunded,
            payment_method: None,
        };
    }
    derive_payment_status(
        payments
            .iter()
            .map(|payment| (payment.status, payment.payment_method.as_str())),
    )
}

#[cfg(test)]
mod tests {
    use crate::enums::PaymentRecordStatus::*;

    use super::*;

    fn derive(statuses: &[PaymentRecordStatus]) -> PaymentStatus {
        derive_payment_status(statuses.iter().map(|s| (*s, "cash"))).status
    }

    #[test]
    fn no_payments_is_pending() {
        assert_eq!(derive(&[]), PaymentStatus::Pending);
    }

    #[test]
    fn any_completed_wins() {
        assert_eq!(derive(&[Failed, Completed, Pending]), PaymentStatus::Paid);
        assert_eq!(derive(&[Cancelled, Completed]), PaymentStatus::Paid);
    }

    #[test]
    fn completed_payment_supplies_the_method() {
        let derived =
            derive_payment_status([(Failed, "card"), (Completed, "gcash"), (Completed, "cash")]);
        assert_eq!(derived.payment_method.as_deref(), Some("gcash"));
    }

    #[test]
    fn uniform_failures_and_cancellations() {
        assert_eq!(derive(&[Failed, Failed]), PaymentStatus::Failed);
        assert_eq!(derive(&[Cancelled]), PaymentStatus::Cancelled);
    }

    #[test]
    fn mixtures_without_completion_stay_pending() {
        assert_eq!(derive(&[Failed, Pending]), PaymentStatus::Pending);
        assert_eq!(derive(&[Cancelled, Pending]), PaymentStatus::Pending);
        assert_eq!(derive(&[Failed, Cancelled]), PaymentStatus::Pending);
    }

    #[test]
    fn derivation_ignores_order() {
        let sets: [&[PaymentRecordStatus]; 4] = [
            &[Pending, Failed, Completed],
            &[Failed, Failed, Cancelled],
            &[Cancelled, Cancelled],
            &[Pending, Pending],
        ];
        for set in sets {
            let mut reversed = set.to_vec();
            reversed.reverse();
            assert_eq!(derive(set), derive(&reversed));
        }
    }

    #[test]
    fn refund_overrides_ledger() {
        let derived = resolve(&[], Some(RefundStatus::Refunded));
        assert_eq!(derived.status, PaymentStatus::Refunded);
        let derived = resolve(&[], Some(RefundStatus::NotRefunded));
        assert_eq!(derived.status, PaymentStatus::Pending);
    }
}
