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

use std::time::Instant;

use agreement::{Metric, TokenObserver, TokenScore, TracingObserver};
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over scored positions, with the running mean of `metric` and
/// tokens/s. Per-token lines still go to the log.
pub struct ProgressObserver {
    label: String,
    metric: Metric,
    bar: Option<ProgressBar>,
    log: TracingObserver,
    started: Instant,
    seen: usize,
    sum: f64,
}

impl ProgressObserver {
    pub fn new(label: &str, metric: Metric) -> Self {
        Self { label: label.to_string(), metric, bar: None, log: TracingObserver::new(label), started: Instant::now(), seen: 0, sum: 0.0 }
    }
}

impl TokenObserver for ProgressObserver {
    fn on_start(&mut self, positions: usize) {
        let bar = ProgressBar::new(positions as u64);
        if let Ok(style) = ProgressStyle::with_template("{wide_bar} {pos}/{len} | {msg}") {
            bar.set_style(style);
        }
        bar.set_message(format!("{}: start", self.label));
        self.bar = Some(bar);
        self.started = Instant::now();
    }

    fn on_token(&mut self, score: &TokenScore, total: usize) {
        self.seen += 1;
        self.sum += self.metric.of(score);
        if let Some(bar) = &self.bar {
            // keep log lines from tearing the bar
            bar.suspend(|| self.log.on_token(score, total));
            bar.set_position(self.seen as u64);
            let elapsed = self.started.elapsed().as_secs_f64();
            let tok_per_sec = if elapsed > 0.0 { self.seen as f64 / elapsed } else { 0.0 };
            bar.set_message(format!("{}: mean={:.4} tok/s={:.1}", self.label, self.running_mean().unwrap_or(0.0), tok_per_sec));
        } else {
            self.log.on_token(score, total);
        }
    }

    fn on_finish(&mut self) {
        if let Some(bar) = self.bar.take() { bar.finish_and_clear(); }
    }
}

impl ProgressObserver {
    fn running_mean(&self) -> Option<f64> {
        (self.seen > 0).then(|| self.sum / self.seen as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(position: usize, agreement: f64, target_probability: f64) -> TokenScore {
        TokenScore {
            position, target_id: 10, target_text: "a".into(), best_id: 11, best_text: "b".into(),
            agreement, target_probability, best_probability: 0.5, context_len: position + 3,
        }
    }

    #[test]
    fn running_mean_follows_selected_metric() {
        let mut obs = ProgressObserver::new("t", Metric::TargetProbability);
        assert_eq!(obs.running_mean(), None);
        obs.on_token(&record(1, 1.0, 0.25), 4);
        obs.on_token(&record(2, 0.5, 0.75), 4);
        assert_eq!(obs.running_mean(), Some(0.5));

        let mut obs = ProgressObserver::new("t", Metric::Agreement);
        obs.on_token(&record(1, 1.0, 0.25), 4);
        obs.on_token(&record(2, 0.5, 0.75), 4);
        assert_eq!(obs.running_mean(), Some(0.75));
    }
}
