//! CNPJ check-digit validation.
//!
//! The tax id is reduced to its digits. It must have exactly 14 of them and must
//! not be a single repeated digit. Digits 13 and 14 are check digits, each the
//! weighted sum of the preceding digits mod 11, mapped as `r < 2 → 0`, else
//! `11 - r`. Validation only annotates; it never drops a record.

use crate::config::TaxIdConfig;
use crate::process::utils::digits_only;

pub const CNPJ_LEN: usize = 14;

#[derive(Debug, Clone)]
pub struct TaxIdValidator {
    first_weights: Vec<u32>,
    second_weights: Vec<u32>,
}

impl Default for TaxIdValidator {
    fn default() -> Self {
        Self::new(&TaxIdConfig::default())
    }
}

impl TaxIdValidator {
    pub fn new(cfg: &TaxIdConfig) -> Self {
        Self {
            first_weights: cfg.first_weights.clone(),
            second_weights: cfg.second_weights.clone(),
        }
    }

    /// Never fails; malformed input is simply invalid.
    pub fn is_valid(&self, raw: &str) -> bool {
        let digits: Vec<u32> = digits_only(raw)
            .chars()
            .filter_map(|c| c.to_digit(10))
            .collect();

        if digits.len() != CNPJ_LEN || digits.iter().all(|d| *d == digits[0]) {
            return false;
        }

        let first = check_digit(&digits[..12], &self.first_weights);
        if first != Some(digits[12]) {
            return false;
        }
        let second = check_digit(&digits[..13], &self.second_weights);
        second == Some(digits[13])
    }
}

/// `None` when the weight vector does not cover `digits`.
fn check_digit(digits: &[u32], weights: &[u32]) -> Option<u32> {
    if weights.len() != digits.len() {
        return None;
    }
    let sum: u64 = digits
        .iter()
        .zip(weights)
        .map(|(&d, &w)| u64::from(d) * u64::from(w))
        .sum();
    let remainder = (sum % 11) as u32;
    Some(if remainder < 2 { 0 } else { 11 - remainder })
}

/// Validate with the standard CNPJ weights.
pub fn validate_cnpj(raw: &str) -> bool {
    TaxIdValidator::default().is_valid(raw)
}
