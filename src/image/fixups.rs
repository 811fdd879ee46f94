//! Provisional token tracking and the post-population fixup and sort passes.
//!
//! IL emitted while the image is still growing may need tokens for rows whose
//! final index is not known yet. Callers take a provisional token (row indices
//! counting down from the top of the 24-bit range so they can never collide
//! with real rows), embed it in the code stream, and record the site. Once all
//! rows exist, [`FixupEngine::apply`] patches every recorded site with the
//! final row index. Table sorting runs strictly after that, so sorted tables
//! must never be referenced by raw row index from other rows.

use rustc_hash::FxHashMap;

use crate::{
    metadata::tables::{sort_keys, TableId, TableStore},
    metadata::token::Token,
    Error, Result,
};

/// The highest 24-bit row index, where provisional numbering starts.
const PROVISIONAL_TOP: u32 = 0x00FF_FFFF;

/// A recorded token site in the code stream.
#[derive(Clone, Copy, Debug)]
struct FixupSite {
    /// Absolute offset of the 4-byte token in the code stream.
    code_offset: u32,
    /// The token written at the site when it was recorded.
    token: Token,
}

/// Tracks provisional tokens and the code sites that must be patched.
pub struct FixupEngine {
    /// Next provisional row per table tag, counting down.
    next_provisional: FxHashMap<u8, u32>,
    /// Provisional token to final token, filled as rows are assigned.
    assignments: FxHashMap<Token, Token>,
    sites: Vec<FixupSite>,
}

impl FixupEngine {
    /// Creates an engine with no provisional tokens or recorded sites.
    #[must_use]
    pub fn new() -> Self {
        FixupEngine {
            next_provisional: FxHashMap::default(),
            assignments: FxHashMap::default(),
            sites: Vec::new(),
        }
    }

    /// Hands out a fresh provisional token for `table`.
    pub fn provisional_token(&mut self, table: TableId) -> Token {
        let next = self
            .next_provisional
            .entry(table.tag())
            .or_insert(PROVISIONAL_TOP);
        let row = *next;
        *next -= 1;
        Token::from_parts(table.tag(), row)
    }

    /// Returns true when `token` lies in the provisional range of its table.
    #[must_use]
    pub fn is_provisional(&self, token: Token) -> bool {
        match self.next_provisional.get(&token.table()) {
            Some(&next) => token.row() > next,
            None => false,
        }
    }

    /// Maps a provisional token to its final row.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFixup`] when the two tokens disagree on the
    /// table, which would rewrite a site into the wrong table.
    pub fn assign_final(&mut self, provisional: Token, final_token: Token) -> Result<()> {
        if provisional.table() != final_token.table() {
            return Err(Error::InvalidFixup {
                offset: 0,
                expected: provisional.table(),
                found: final_token.table(),
            });
        }
        self.assignments.insert(provisional, final_token);
        Ok(())
    }

    /// Records a token site at `code_offset` in the code stream.
    pub fn record(&mut self, code_offset: u32, token: Token) {
        self.sites.push(FixupSite { code_offset, token });
    }

    /// Number of recorded sites.
    #[must_use]
    pub fn site_count(&self) -> usize {
        self.sites.len()
    }

    /// Patches every recorded site in `code` with the final row index.
    ///
    /// Each site is verified against the table tag recorded with it before the
    /// low three bytes are rewritten; non-provisional tokens pass through with
    /// the tag check only.
    ///
    /// # Errors
    /// - [`Error::LayoutFailed`] when a site lies outside the code stream
    /// - [`Error::InvalidFixup`] when the tag at the site does not match
    /// - [`Error::UnresolvedEntity`] when a provisional token was never
    ///   assigned a final row
    pub fn apply(&self, code: &mut [u8]) -> Result<()> {
        for site in &self.sites {
            let offset = site.code_offset as usize;
            if offset + 4 > code.len() {
                return Err(Error::LayoutFailed(format!(
                    "token fixup at offset {offset} lies outside the code stream ({} bytes)",
                    code.len()
                )));
            }
            let found = Token(u32::from_le_bytes([
                code[offset],
                code[offset + 1],
                code[offset + 2],
                code[offset + 3],
            ]));
            if found.table() != site.token.table() {
                return Err(Error::InvalidFixup {
                    offset: site.code_offset,
                    expected: site.token.table(),
                    found: found.table(),
                });
            }
            if !self.is_provisional(found) {
                continue;
            }
            let final_token = self
                .assignments
                .get(&found)
                .ok_or(Error::UnresolvedEntity(u64::from(found.value())))?;
            let row = final_token.row();
            code[offset] = (row & 0xff) as u8;
            code[offset + 1] = ((row >> 8) & 0xff) as u8;
            code[offset + 2] = ((row >> 16) & 0xff) as u8;
        }
        Ok(())
    }
}

impl Default for FixupEngine {
    fn default() -> Self {
        FixupEngine::new()
    }
}

/// Sorts every table that the format requires to be sorted.
///
/// Must run after [`FixupEngine::apply`]: rows cross-reference sorted tables
/// only by token, never by raw index, so no second fixup pass exists.
pub fn sort_tables(store: &mut TableStore) {
    use strum::IntoEnumIterator;
    for table in TableId::iter() {
        if let Some((primary, secondary)) = sort_keys(table) {
            store.sort_rows(table, primary, secondary);
        }
    }
}
