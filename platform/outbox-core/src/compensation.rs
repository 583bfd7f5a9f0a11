/// One entry in the baseline compensation map: the event type that
/// triggers it and the compensation event type to emit in response.
#[derive(Debug, Clone, Copy)]
pub struct CompensationMapping {
    pub original: &'static str,
    pub compensation: &'static str,
    pub reason: &'static str,
}

const BASELINE: &[CompensationMapping] = &[
    CompensationMapping {
        original: "RESERVE",
        compensation: "RELEASE",
        reason: "free reserved stock",
    },
    CompensationMapping {
        original: "ORDER_CREATED",
        compensation: "ORDER_TIMEOUT",
        reason: "cancel pending order",
    },
    CompensationMapping {
        original: "PAYMENT_INITIATED",
        compensation: "PAYMENT_CANCEL",
        reason: "abort charge",
    },
];

/// Look up the compensation mapped to `event_type`, if any.
pub fn compensation_for(event_type: &str) -> Option<&'static CompensationMapping> {
    BASELINE.iter().find(|m| m.original == event_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_map_covers_the_three_documented_legs() {
        assert_eq!(compensation_for("RESERVE").unwrap().compensation, "RELEASE");
        assert_eq!(
            compensation_for("ORDER_CREATED").unwrap().compensation,
            "ORDER_TIMEOUT"
        );
        assert_eq!(
            compensation_for("PAYMENT_INITIATED").unwrap().compensation,
            "PAYMENT_CANCEL"
        );
    }

    #[test]
    fn unmapped_event_type_returns_none() {
        assert!(compensation_for("PRODUCT_CREATED").is_none());
    }
}
