//! The API endpoints URIs.

/// The route that syncs and returns the authenticated user's transactions.
pub const TRANSACTIONS: &str = "/api/transactions";
