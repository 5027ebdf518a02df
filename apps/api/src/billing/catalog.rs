use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::StripeConfig;
use crate::tiers::ParseEnumError;

/// Things a user can buy through hosted Checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Product {
    /// Monthly premium subscription.
    Premium,
    CreditsSmall,
    CreditsMedium,
    CreditsLarge,
}

impl Product {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Premium => "premium",
            Self::CreditsSmall => "credits_small",
            Self::CreditsMedium => "credits_medium",
            Self::CreditsLarge => "credits_large",
        }
    }

    /// Stripe Checkout mode for this product.
    pub const fn checkout_mode(&self) -> &'static str {
        match self {
            Self::Premium => "subscription",
            _ => "payment",
        }
    }

    /// Generation credits granted by a one-time pack; zero for subscriptions.
    pub const fn credits(&self) -> i32 {
        match self {
            Self::Premium => 0,
            Self::CreditsSmall => 5,
            Self::CreditsMedium => 15,
            Self::CreditsLarge => 40,
        }
    }

    pub fn price_id<'a>(&self, stripe: &'a StripeConfig) -> &'a str {
        match self {
            Self::Premium => &stripe.price_premium,
            Self::CreditsSmall => &stripe.price_credits_small,
            Self::CreditsMedium => &stripe.price_credits_medium,
            Self::CreditsLarge => &stripe.price_credits_large,
        }
    }
}

impl FromStr for Product {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "premium" => Ok(Self::Premium),
            "credits_small" => Ok(Self::CreditsSmall),
            "credits_medium" => Ok(Self::CreditsMedium),
            "credits_large" => Ok(Self::CreditsLarge),
            _ => Err(ParseEnumError {
                kind: "product",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_subscription_vs_payment_modes() {
        assert_eq!(Product::Premium.checkout_mode(), "subscription");
        assert_eq!(Product::CreditsSmall.checkout_mode(), "payment");
        assert_eq!(Product::CreditsLarge.checkout_mode(), "payment");
    }

    #[test]
    fn test_price_ids_come_from_config() {
        let config = Config::for_tests();
        assert_eq!(Product::Premium.price_id(&config.stripe), "price_premium");
        assert_eq!(Product::CreditsMedium.price_id(&config.stripe), "price_medium");
    }

    #[test]
    fn test_product_names_round_trip_through_metadata() {
        for product in [
            Product::Premium,
            Product::CreditsSmall,
            Product::CreditsMedium,
            Product::CreditsLarge,
        ] {
            assert_eq!(product.as_str().parse::<Product>().unwrap(), product);
        }
        assert!("credits_huge".parse::<Product>().is_err());
    }
}
