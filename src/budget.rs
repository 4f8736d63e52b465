//! Budget aggregation: derived totals for a single trip and cross-trip
//! savings for the analytics view. Pure functions, recomputed on every
//! mutation of the in-memory expense list.

use serde::Serialize;

use crate::models::{expense::Expense, trip::Trip};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BudgetTotals {
    pub spent: f64,
    /// May be negative; overspend is surfaced, never clamped.
    pub remaining: f64,
    /// Clamped to 0..=100 for display.
    pub percent_used: f64,
}

pub fn compute_totals(expenses: &[Expense], budget: f64) -> BudgetTotals {
    let spent: f64 = expenses.iter().map(|expense| expense.cost).sum();
    let remaining = budget - spent;
    let percent_used = if budget > 0.0 {
        ((spent / budget) * 100.0).clamp(0.0, 100.0)
    } else if spent > 0.0 {
        // Zero budget with any spend reads as fully used.
        100.0
    } else {
        0.0
    };

    BudgetTotals {
        spent,
        remaining,
        percent_used,
    }
}

/// Sums each trip's remaining budget; a trip with no synced expenses falls
/// back to its full budget. Deliberate approximation: unsynced means unspent.
pub fn compute_savings(trips: &[Trip]) -> f64 {
    trips
        .iter()
        .map(|trip| trip.remaining_budget.unwrap_or(trip.budget))
        .sum()
}

pub fn unique_destinations(trips: &[Trip]) -> usize {
    let mut seen: Vec<String> = trips
        .iter()
        .map(|trip| trip.destination.trim().to_lowercase())
        .filter(|destination| !destination.is_empty())
        .collect();
    seen.sort();
    seen.dedup();
    seen.len()
}
