//! Metadata tokens: the 32-bit table-tag-plus-row references used throughout
//! an image.

use std::fmt;
use std::hash::{Hash, Hasher};

/// A metadata token representing a reference to a metadata table entry.
///
/// Tokens in .NET metadata consist of a 32-bit value where:
/// - The high byte (bits 24-31) indicates the table type
/// - The low 24 bits (bits 0-23) indicate the row index within that table
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Token(pub u32);

impl Token {
    /// Creates a new token from a raw 32-bit value
    #[must_use]
    pub fn new(value: u32) -> Self {
        Token(value)
    }

    /// Creates a token from a table tag and a 1-based row index
    #[must_use]
    pub fn from_parts(table: u8, row: u32) -> Self {
        Token((u32::from(table) << 24) | (row & 0x00FF_FFFF))
    }

    /// Returns the raw token value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Extracts the table type from the token (high byte)
    #[must_use]
    pub fn table(&self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Extracts the row index from the token (low 24 bits)
    #[must_use]
    pub fn row(&self) -> u32 {
        self.0 & 0x00FF_FFFF
    }

    /// Returns true if this is a null token (value 0)
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u32> for Token {
    fn from(value: u32) -> Self {
        Token(value)
    }
}

impl From<Token> for u32 {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Token(0x{:08x}, table: 0x{:02x}, row: {})",
            self.0,
            self.table(),
            self.row()
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_token_new() {
        let token = Token::new(0x06000001);
        assert_eq!(token.value(), 0x06000001);
    }

    #[test]
    fn test_token_from_parts() {
        let token = Token::from_parts(0x02, 5);
        assert_eq!(token.value(), 0x02000005);
        assert_eq!(token.table(), 0x02);
        assert_eq!(token.row(), 5);

        // Row is masked to 24 bits
        let wide = Token::from_parts(0x06, 0xFF00_0001);
        assert_eq!(wide.table(), 0x06);
        assert_eq!(wide.row(), 1);
    }

    #[test]
    fn test_token_table() {
        let token = Token(0x06000001);
        assert_eq!(token.table(), 0x06);

        let token2 = Token(0x02000005);
        assert_eq!(token2.table(), 0x02);

        let token3 = Token(0x00000000);
        assert_eq!(token3.table(), 0x00);
    }

    #[test]
    fn test_token_row() {
        let token = Token(0x06000001);
        assert_eq!(token.row(), 1);

        let token2 = Token(0x06FFFFFF);
        assert_eq!(token2.row(), 0x00FFFFFF);
    }

    #[test]
    fn test_token_is_null() {
        assert!(Token(0x00000000).is_null());
        assert!(!Token(0x06000001).is_null());
    }

    #[test]
    fn test_token_from_conversion() {
        let value = 0x06000001u32;
        let token: Token = value.into();
        assert_eq!(token.value(), value);

        let back_to_u32: u32 = token.into();
        assert_eq!(back_to_u32, value);
    }

    #[test]
    fn test_token_display() {
        assert_eq!(format!("{}", Token(0x06000001)), "0x06000001");
        assert_eq!(format!("{}", Token(0x00000000)), "0x00000000");
    }

    #[test]
    fn test_token_debug() {
        let debug_str = format!("{:?}", Token(0x06000001));
        assert!(debug_str.contains("Token(0x06000001"));
        assert!(debug_str.contains("table: 0x06"));
        assert!(debug_str.contains("row: 1"));
    }

    #[test]
    fn test_token_ordering() {
        let token1 = Token(0x06000001);
        let token2 = Token(0x06000002);
        let token3 = Token(0x07000001);

        assert!(token1 < token2);
        assert!(token2 < token3);
    }

    #[test]
    fn test_token_hash() {
        let mut map = HashMap::new();
        map.insert(Token(0x06000001), "Method1");
        map.insert(Token(0x06000002), "Method2");

        assert_eq!(map.get(&Token(0x06000001)), Some(&"Method1"));
        assert_eq!(map.get(&Token(0x06000002)), Some(&"Method2"));
    }

    #[test]
    fn test_token_boundary_values() {
        let max_token = Token(0xFFFFFFFF);
        assert_eq!(max_token.table(), 0xFF);
        assert_eq!(max_token.row(), 0x00FFFFFF);

        let table_boundary = Token(0x01000000);
        assert_eq!(table_boundary.table(), 0x01);
        assert_eq!(table_boundary.row(), 0);
    }
}
