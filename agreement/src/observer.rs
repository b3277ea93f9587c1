// Copyright (C) 2025 Noah Cashin <noahc959@icloud.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

// * Per-token diagnostics side channel. Observers see records in position order
// * as they are produced; they cannot alter the run.

use tracing::{debug, info};

use crate::scorer::TokenScore;

pub trait TokenObserver {
    /// Called once before the first position with the number of positions that will be scored.
    fn on_start(&mut self, _positions: usize) {}
    /// `total` is the implementation's token count, boundary tokens included.
    fn on_token(&mut self, score: &TokenScore, total: usize);
    fn on_finish(&mut self) {}
}

impl TokenObserver for () {
    fn on_token(&mut self, _score: &TokenScore, _total: usize) {}
}

/// Logs disagreeing tokens at `info` and fully agreed ones at `debug`.
pub struct TracingObserver {
    label: String,
}

impl TracingObserver {
    pub fn new(label: impl Into<String>) -> Self { Self { label: label.into() } }
}

impl TokenObserver for TracingObserver {
    fn on_token(&mut self, s: &TokenScore, total: usize) {
        if s.agreement != 1.0 {
            info!(
                run = %self.label,
                "{:>3}/{} = {:.16} {:?} -> {:?}",
                s.position, total, s.agreement, s.target_text, s.best_text
            );
        } else {
            debug!(run = %self.label, position = s.position, total, token = ?s.target_text, "agreed");
        }
    }
}
