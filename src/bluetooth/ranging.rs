// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! RSSI to distance estimation.
//!
//! Each sample is converted with the log-distance path-loss model and the
//! results are averaged over a short window. The window shrinks when the
//! signal is weak so that the estimate reacts faster when the peer is far.

use bluer::Address;

use super::constants::{
    PATH_LOSS_EXPONENT, RSSI_MEASURED_POWER, SAMPLES_PER_ESTIMATE, SAMPLES_PER_ESTIMATE_WEAK,
    WEAK_SIGNAL_RSSI,
};
use super::radio::RssiSample;

/// Instantaneous distance in meters for one RSSI reading.
pub fn rssi_to_distance(rssi: i16) -> f64 {
    let loss = i32::from(RSSI_MEASURED_POWER) - i32::from(rssi);
    let exponent = f64::from(loss) / (10.0 * PATH_LOSS_EXPONENT);
    10f64.powf(exponent)
}

/// Round to one decimal place, ties to even, on the exact value of `value`.
///
/// Scaling by ten first would round twice: 0.15 is stored just below the
/// midpoint and must go down.
pub fn round_to_tenth(value: f64) -> f64 {
    if !value.is_finite() {
        return value;
    }

    // Every double whose hundredths digit can be 5 is above 2^-5, so its
    // exact decimal expansion fits in 80 fractional digits.
    let exact = format!("{:.80}", value.abs());
    let Some((whole, fraction)) = exact.split_once('.') else {
        return value;
    };
    let mut digits = fraction.bytes();
    let tenths = digits.next().map_or(0, |d| u64::from(d - b'0'));
    let Ok(whole) = whole.parse::<u64>() else {
        return value;
    };
    let truncated = whole * 10 + tenths;

    let round_up = match digits.next() {
        Some(d) if d > b'5' => true,
        Some(b'5') => {
            let above_midpoint = digits.any(|d| d != b'0');
            above_midpoint || truncated % 2 == 1
        }
        _ => false,
    };

    let scaled = if round_up { truncated + 1 } else { truncated };
    (scaled as f64 / 10.0).copysign(value)
}

/// Smoothed distance from a stream of RSSI readings.
#[derive(Debug, Clone, Default)]
pub struct DistanceEstimator {
    sum: f64,
    count: u32,
}

impl DistanceEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one reading. Returns a new estimate when the window fills.
    ///
    /// After an estimate the mean stays in the accumulator as a single
    /// sample, so the next window starts from the previous estimate.
    pub fn push(&mut self, rssi: i16) -> Option<f64> {
        self.sum += rssi_to_distance(rssi);
        self.count += 1;

        let window = if rssi < WEAK_SIGNAL_RSSI {
            SAMPLES_PER_ESTIMATE_WEAK
        } else {
            SAMPLES_PER_ESTIMATE
        };

        if self.count < window {
            return None;
        }

        let mean = self.sum / f64::from(self.count);
        self.sum = mean;
        self.count = 1;
        Some(round_to_tenth(mean))
    }
}

/// Distance estimator bound to one peer; samples from other devices are ignored.
#[derive(Debug, Clone)]
pub struct PeerRanging {
    peer: Address,
    estimator: DistanceEstimator,
}

impl PeerRanging {
    pub fn new(peer: Address) -> Self {
        Self {
            peer,
            estimator: DistanceEstimator::new(),
        }
    }

    pub fn peer(&self) -> Address {
        self.peer
    }

    pub fn push(&mut self, sample: &RssiSample) -> Option<f64> {
        if sample.address != self.peer {
            return None;
        }
        self.estimator.push(sample.rssi)
    }
}
