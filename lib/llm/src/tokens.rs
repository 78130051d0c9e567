// SPDX-FileCopyrightText: Copyright (c) 2024-2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Token sequences and the per-token cache state a slot holds.

/// A token is represented as a 32-bit unsigned integer.
pub type Token = u32;

/// Opaque engine state produced when a token is evaluated. Each cell depends on the token
/// and on every cell before it, so equal cells imply equal prefixes.
pub type Cell = u64;

/// Computes a hash of the data using the given seed.
pub fn compute_hash(data: &[u8], seed: u64) -> u64 {
    xxhash_rust::xxh3::xxh3_64_with_seed(data, seed)
}

/// The cell for `token` evaluated right after `prev`.
pub fn chain_cell(token: Token, prev: Cell) -> Cell {
    compute_hash(&token.to_le_bytes(), prev)
}

/// The cell every sequence of a given model starts from.
pub fn root_cell(model: &str) -> Cell {
    compute_hash(model.as_bytes(), 0)
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("token state is misaligned: {tokens} tokens but {cells} cells")]
pub struct MisalignedState {
    pub tokens: usize,
    pub cells: usize,
}

/// The computed state of a slot: the evaluated tokens and the cell produced by each.
///
/// `tokens` and `cells` always have the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenState {
    tokens: Vec<Token>,
    cells: Vec<Cell>,
}

impl TokenState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(tokens: Vec<Token>, cells: Vec<Cell>) -> Result<Self, MisalignedState> {
        if tokens.len() != cells.len() {
            return Err(MisalignedState {
                tokens: tokens.len(),
                cells: cells.len(),
            });
        }
        Ok(Self { tokens, cells })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Cell of the last evaluated token, if any.
    pub fn last_cell(&self) -> Option<Cell> {
        self.cells.last().copied()
    }

    pub fn push(&mut self, token: Token, cell: Cell) {
        self.tokens.push(token);
        self.cells.push(cell);
    }

    pub fn extend(&mut self, evaluated: impl IntoIterator<Item = (Token, Cell)>) {
        for (token, cell) in evaluated {
            self.push(token, cell);
        }
    }

    pub fn truncate(&mut self, len: usize) {
        self.tokens.truncate(len);
        self.cells.truncate(len);
    }

    pub fn clear(&mut self) {
        self.tokens.clear();
        self.cells.clear();
    }

    /// Keep only the first `len` tokens of a copy.
    pub fn prefix(&self, len: usize) -> TokenState {
        let len = len.min(self.len());
        TokenState {
            tokens: self.tokens[..len].to_vec(),
            cells: self.cells[..len].to_vec(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Token, Cell)> + '_ {
        self.tokens.iter().copied().zip(self.cells.iter().copied())
    }

    /// Evaluate `tokens` on top of the current state with the deterministic cell chain.
    pub fn evaluate(&mut self, root: Cell, tokens: &[Token]) {
        let mut prev = self.last_cell().unwrap_or(root);
        for &token in tokens {
            prev = chain_cell(token, prev);
            self.push(token, prev);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_is_enforced() {
        assert!(TokenState::from_parts(vec![1, 2], vec![7, 8]).is_ok());
        assert_eq!(
            TokenState::from_parts(vec![1, 2], vec![7]).unwrap_err(),
            MisalignedState {
                tokens: 2,
                cells: 1
            }
        );
    }

    #[test]
    fn test_truncate_keeps_cells_aligned() {
        let mut state = TokenState::new();
        state.evaluate(root_cell("m"), &[1, 2, 3, 4]);
        state.truncate(2);
        assert_eq!(state.tokens(), &[1, 2]);
        assert_eq!(state.cells().len(), 2);

        let copy = state.prefix(10);
        assert_eq!(copy, state);
    }

    #[test]
    fn test_cells_depend_on_history() {
        let root = root_cell("m");
        let mut a = TokenState::new();
        a.evaluate(root, &[1, 2, 3]);
        let mut b = TokenState::new();
        b.evaluate(root, &[9, 2, 3]);

        assert_ne!(a.cells()[2], b.cells()[2]);

        // evaluating in two steps matches evaluating at once
        let mut c = TokenState::new();
        c.evaluate(root, &[1, 2]);
        c.evaluate(root, &[3]);
        assert_eq!(a, c);

        // different models start from different roots
        let mut d = TokenState::new();
        d.evaluate(root_cell("other"), &[1, 2, 3]);
        assert_ne!(a.cells(), d.cells());
    }
}
