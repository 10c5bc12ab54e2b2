/* Copyright (c) 2018 University of Utah
 *
 * Permission to use, copy, modify, and distribute this software for any
 * purpose with or without fee is hereby granted, provided that the above
 * copyright notice and this permission notice appear in all copies.
 *
 * THE SOFTWARE IS PROVIDED "AS IS" AND THE AUTHOR(S) DISCLAIM ALL WARRANTIES
 * WITH REGARD TO THIS SOFTWARE INCLUDING ALL IMPLIED WARRANTIES OF
 * MERCHANTABILITY AND FITNESS. IN NO EVENT SHALL AUTHORS BE LIABLE FOR
 * ANY SPECIAL, DIRECT, INDIRECT, OR CONSEQUENTIAL DAMAGES OR ANY DAMAGES
 * WHATSOEVER RESULTING FROM LOSS OF USE, DATA OR PROFITS, WHETHER IN AN
 * ACTION OF CONTRACT, NEGLIGENCE OR OTHER TORTIOUS ACTION, ARISING OUT OF
 * OR IN CONNECTION WITH THE USE OR PERFORMANCE OF THIS SOFTWARE.
 */

use thiserror::Error;

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Errors surfaced by the runtime core. Command dispatch failures are
/// recorded against a message id and logged; they never tear down the
/// data plane. `Fatal` indicates a broken invariant and is only ever
/// constructed right before a thread panics.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("could not parse topology: {0}")]
    Config(String),

    #[error("no router named '{0}'")]
    RouterNotFound(String),

    #[error("no element named '{0}' in router '{1}'")]
    ElementNotFound(String, String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("transient failure, retry: {0}")]
    Transient(String),

    #[error("internal invariant violated: {0}")]
    Fatal(String),
}

impl CoreError {
    /// Maps an error to the status code recorded in `Master::msg_status`.
    pub fn status_code(&self) -> i32 {
        match self {
            CoreError::Transient(_) => 0,
            _ => -1,
        }
    }
}
