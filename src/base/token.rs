//! Correlation tokens.

use rand::Rng;
use std::fmt;

//------------ Token ---------------------------------------------------------

/// An opaque 128 bit identifier correlating a sent query with its response.
///
/// Tokens are drawn from a cryptographically secure generator so that a
/// third party cannot guess the token of an outstanding query and spoof an
/// answer to it.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Token([u8; 16]);

impl Token {
    /// Creates a fresh random token.
    pub fn new() -> Self {
        Token(rand::thread_rng().gen())
    }

    /// Returns the raw octets of the token.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl From<[u8; 16]> for Token {
    fn from(bytes: [u8; 16]) -> Self {
        Token(bytes)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for octet in &self.0 {
            write!(f, "{:02x}", octet)?;
        }
        Ok(())
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tokens_differ() {
        assert_ne!(Token::new(), Token::new());
    }

    #[test]
    fn display_is_hex() {
        let token = Token::from([0xab; 16]);
        assert_eq!(token.to_string(), "ab".repeat(16));
    }
}
