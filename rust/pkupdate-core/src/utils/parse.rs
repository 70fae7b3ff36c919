// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

/// Parse a string into a boolean value.
pub fn str_is_truthy(val: &str) -> bool {
    val.eq_ignore_ascii_case("1")
        | val.eq_ignore_ascii_case("true")
        | val.eq_ignore_ascii_case("on")
        | val.eq_ignore_ascii_case("yes")
        | val.eq_ignore_ascii_case("y")
}

/// Read a numeric setting from the environment, falling back to `default`
/// when the variable is unset or unparsable.
pub fn env_or<T: std::str::FromStr + std::fmt::Display + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(val) => val.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid value {val:?} for {name}, using {default}");
            default
        }),
        Err(_) => default,
    }
}

/// Read a boolean setting from the environment.
pub fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|val| str_is_truthy(&val))
        .unwrap_or(default)
}
