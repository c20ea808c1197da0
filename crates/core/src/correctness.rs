// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2026 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Functions for correctness checks similar to the *design by contract* philosophy.
//!
//! A condition is a predicate which must be true just prior to the execution of
//! some section of code. Checks here return [`BrokerError::InvalidArgument`] rather
//! than panicking, since the broker treats empty/malformed identifiers as programmer
//! error to be rejected, not aborted on.

use crate::error::BrokerError;

/// Checks the string `s` is not empty.
///
/// # Errors
///
/// Returns [`BrokerError::InvalidArgument`] if `s` is empty.
pub fn check_nonempty_string<T: AsRef<str>>(s: T, param: &str) -> Result<(), BrokerError> {
    if s.as_ref().is_empty() {
        return Err(BrokerError::invalid_argument(format!(
            "invalid string for '{param}', was empty"
        )));
    }
    Ok(())
}

/// Checks the string `s` has semantic meaning: non-empty and not all whitespace.
///
/// # Errors
///
/// Returns [`BrokerError::InvalidArgument`] if `s` is empty or consists solely of
/// whitespace characters.
pub fn check_valid_string<T: AsRef<str>>(s: T, param: &str) -> Result<(), BrokerError> {
    let s = s.as_ref();

    if s.is_empty() {
        return Err(BrokerError::invalid_argument(format!(
            "invalid string for '{param}', was empty"
        )));
    }

    if s.chars().all(char::is_whitespace) {
        return Err(BrokerError::invalid_argument(format!(
            "invalid string for '{param}', was all whitespace"
        )));
    }

    Ok(())
}

/// Checks that `${...` is always terminated by a matching `}` in `template`.
///
/// Per the macro/pattern expander's failure contract, an unterminated `${...`
/// is a configuration error reported at validation time, not at publish time.
///
/// # Errors
///
/// Returns [`BrokerError::InvalidArgument`] on the first unterminated `${`.
pub fn check_balanced_macros(template: &str, param: &str) -> Result<(), BrokerError> {
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            match template[i..].find('}') {
                Some(rel) => i += rel + 1,
                None => {
                    return Err(BrokerError::invalid_argument(format!(
                        "invalid template for '{param}', unterminated '${{' at byte {i}"
                    )));
                }
            }
        } else {
            i += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("a", true)]
    #[case(" a", true)]
    #[case("abc", true)]
    #[case("", false)]
    fn test_check_nonempty_string(#[case] s: &str, #[case] expected: bool) {
        assert_eq!(check_nonempty_string(s, "value").is_ok(), expected);
    }

    #[rstest]
    #[case(" a", true)]
    #[case("abc", true)]
    #[case("", false)]
    #[case(" ", false)]
    #[case("   ", false)]
    fn test_check_valid_string(#[case] s: &str, #[case] expected: bool) {
        assert_eq!(check_valid_string(s, "value").is_ok(), expected);
    }

    #[rstest]
    #[case("no macros here", true)]
    #[case("${id}", true)]
    #[case("${id}_${count}", true)]
    #[case("${id", false)]
    #[case("prefix_${unterminated", false)]
    fn test_check_balanced_macros(#[case] template: &str, #[case] expected: bool) {
        assert_eq!(check_balanced_macros(template, "template").is_ok(), expected);
    }
}
