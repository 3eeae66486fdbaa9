//! Input validation for configuration and command-line values
//!
//! Everything that ends up as an ip6tables argument passes through here
//! before a [`RuntimeParameters`](crate::core::rules::RuntimeParameters) is
//! built from it.

use crate::core::rules::IFNAMSIZ;

/// Highest queue number the NFQUEUE target accepts
pub const MAX_QUEUE_NUM: u32 = 65_535;

/// Validates a network interface name.
///
/// Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// A single trailing `+` is also accepted; ip6tables treats it as a prefix
/// wildcard (`veth+`). An empty name is passed through unchanged since it
/// terminates the interface list.
///
/// # Errors
///
/// Returns `Err` if interface name violates kernel constraints.
pub fn validate_interface(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Ok(String::new());
    }

    if name.len() >= IFNAMSIZ {
        return Err(format!(
            "Interface name too long (max {} characters)",
            IFNAMSIZ - 1
        ));
    }

    if name == "." || name == ".." {
        return Err("Invalid interface name".to_string());
    }

    let stem = name.strip_suffix('+').unwrap_or(name);
    if stem.is_empty() {
        return Err("Wildcard needs a prefix (e.g. eth+)".to_string());
    }

    // Check for valid characters (ASCII alphanumeric only, plus dot, dash, underscore)
    if !stem
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err("Interface name contains invalid characters".to_string());
    }

    Ok(name.to_string())
}

/// Validates the mark mask.
///
/// # Errors
///
/// Returns `Err` for a zero mask, which would match every packet and make
/// the mark exclusions swallow all traffic.
pub fn validate_mask(mask: u32) -> Result<u32, String> {
    if mask == 0 {
        Err("Mask must have at least one bit set".to_string())
    } else {
        Ok(mask)
    }
}

/// Warns when the mark has bits the mask discards.
///
/// Returns `Some(warning)` if `mark & !mask != 0`. Not an error: ip6tables
/// accepts the pair, but the extra bits are never matched.
pub fn check_mark_outside_mask(mark: u32, mask: u32) -> Option<String> {
    let stray = mark & !mask;
    if stray == 0 {
        None
    } else {
        Some(format!(
            "Mark {mark:#x} has bits outside mask {mask:#x} ({stray:#x}); they are ignored"
        ))
    }
}

/// Validates an NFQUEUE number.
///
/// # Errors
///
/// Returns `Err` if the number exceeds [`MAX_QUEUE_NUM`].
pub fn validate_queue_num(queue_num: u32) -> Result<u32, String> {
    if queue_num > MAX_QUEUE_NUM {
        Err(format!("Queue number must be between 0 and {MAX_QUEUE_NUM}"))
    } else {
        Ok(queue_num)
    }
}

/// Parses a decimal or `0x`-prefixed hexadecimal `u32`.
///
/// Used as the clap value parser for `--mark` and `--mask`.
///
/// # Examples
///
/// ```
/// use fakehttp_ipt6::validators::parse_u32;
///
/// assert_eq!(parse_u32("0x8000"), Ok(0x8000));
/// assert_eq!(parse_u32("32768"), Ok(32768));
/// assert!(parse_u32("-1").is_err());
/// ```
///
/// # Errors
///
/// Returns `Err` if the input is not a valid number or overflows `u32`.
pub fn parse_u32(input: &str) -> Result<u32, String> {
    let trimmed = input.trim();
    let parsed = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => trimmed.parse::<u32>(),
    };
    parsed.map_err(|e| format!("'{input}' is not a valid 32-bit value: {e}"))
}
