pub mod anonymous_session;
pub mod itinerary;
pub mod profile;
