//! Stripe checkout, billing portal and webhook handling.

pub mod catalog;
pub mod handlers;
pub mod stripe_client;
pub mod webhook;
