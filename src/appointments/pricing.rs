use crate::models::GroomingServiceEntity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeTier {
    Xs,
    Small,
    Medium,
    Large,
    Xl,
    Xxl,
}

impl SizeTier {
    /// Case-insensitive lookup of a pet size label.
    pub fn parse(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let tier = match normalized.as_str() {
            "xs" | "extra_small" | "x_small" => SizeTier::Xs,
            "small" | "s" => SizeTier::Small,
            "medium" | "m" => SizeTier::Medium,
            "large" | "l" => SizeTier::Large,
            "xl" | "extra_large" | "x_large" => SizeTier::Xl,
            "xxl" | "2xl" | "xx_large" => SizeTier::Xxl,
            _ => return None,
        };
        Some(tier)
    }
}

/// The six per-size prices of one catalog service.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceTable {
    pub xs: Option<f64>,
    pub small: Option<f64>,
    pub medium: Option<f64>,
    pub large: Option<f64>,
    pub xl: Option<f64>,
    pub xxl: Option<f64>,
}

impl PriceTable {
    fn tier(&self, tier: SizeTier) -> Option<f64> {
        match tier {
            SizeTier::Xs => self.xs,
            SizeTier::Small => self.small,
            SizeTier::Medium => self.medium,
            SizeTier::Large => self.large,
            SizeTier::Xl => self.xl,
            SizeTier::Xxl => self.xxl,
        }
    }

    /// Price for a pet of the given size.
    ///
    /// Missing or non-positive tier prices fall back to the medium price. A
    /// result of `0.0` means the service has no usable price and must not be
    /// booked.
    pub fn price_for(&self, pet_size: &str) -> f64 {
        let valid = |price: Option<f64>| price.filter(|p| p.is_finite() && *p > 0.0);
        SizeTier::parse(pet_size)
            .and_then(|tier| valid(self.tier(tier)))
            .or_else(|| valid(self.medium))
            .unwrap_or(0.0)
    }
}

impl From<&GroomingServiceEntity> for PriceTable {
    fn from(service: &GroomingServiceEntity) -> Self {
        Self {
            xs: service.price_xs,
            small: service.price_small,
            medium: service.price_medium,
            large: service.price_large,
            xl: service.price_xl,
            xxl: service.price_xxl,
        }
    }
}

pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// `base + matted coat fee + add-ons - discount`
pub fn total(
    base_price: f64,
    matted_coat_fee: f64,
    additional: impl IntoIterator<Item = f64>,
    discount: f64,
) -> f64 {
    let add_ons: f64 = additional.into_iter().sum();
    round_money(base_price + matted_coat_fee + add_ons - discount)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_groom() -> PriceTable {
        PriceTable {
            xs: Some(350.0),
            small: Some(400.0),
            medium: Some(500.0),
            large: Some(650.0),
            xl: None,
            xxl: Some(0.0),
        }
    }

    #[test]
    fn size_lookup_is_case_insensitive() {
        assert_eq!(SizeTier::parse("MEDIUM"), Some(SizeTier::Medium));
        assert_eq!(SizeTier::parse(" Extra Large "), Some(SizeTier::Xl));
        assert_eq!(SizeTier::parse("xs"), Some(SizeTier::Xs));
        assert_eq!(SizeTier::parse("giant"), None);
        assert_eq!(full_groom().price_for("Large"), 650.0);
    }

    #[test]
    fn missing_or_zero_tier_falls_back_to_medium() {
        let table = full_groom();
        assert_eq!(table.price_for("xl"), 500.0);
        assert_eq!(table.price_for("xxl"), 500.0);
        assert_eq!(table.price_for("unknown"), 500.0);
    }

    #[test]
    fn no_valid_price_yields_zero() {
        let table = PriceTable {
            small: Some(-5.0),
            medium: None,
            ..Default::default()
        };
        assert_eq!(table.price_for("small"), 0.0);
        assert_eq!(PriceTable::default().price_for("medium"), 0.0);
    }

    #[test]
    fn total_sums_components_and_subtracts_discount() {
        assert_eq!(total(500.0, 0.0, [], 0.0), 500.0);
        assert_eq!(total(500.0, 0.0, [150.0], 0.0), 650.0);
        assert_eq!(total(500.0, 120.0, [150.0, 80.0], 50.0), 800.0);
        assert_eq!(total(0.1, 0.2, [], 0.0), 0.3);
    }
}
