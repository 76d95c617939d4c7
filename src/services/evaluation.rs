//! Confusion matrix and per-class precision/recall for validation reports

use crate::domain::types::{CrowdLabel, CLASS_COUNT};
use tracing::info;

/// Row-major `truth × predicted` counts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    counts: [[u32; CLASS_COUNT]; CLASS_COUNT],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassStats {
    pub label: CrowdLabel,
    /// `TP / (TP + FP)`
    pub precision: f32,
    /// `TP / (TP + FN)`
    pub recall: f32,
    /// Number of true examples of the class
    pub support: u32,
}

impl ConfusionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, truth: CrowdLabel, predicted: CrowdLabel) {
        let cell = &mut self.counts[truth.index()][predicted.index()];
        *cell = cell.saturating_add(1);
    }

    pub fn get(&self, truth: CrowdLabel, predicted: CrowdLabel) -> u32 {
        self.counts[truth.index()][predicted.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().map(|&c| c as u64).sum()
    }

    pub fn accuracy(&self) -> f32 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let correct: u64 = (0..CLASS_COUNT).map(|i| self.counts[i][i] as u64).sum();
        correct as f32 / total as f32
    }

    pub fn class_stats(&self) -> Vec<ClassStats> {
        CrowdLabel::ALL
            .iter()
            .map(|&label| {
                let k = label.index();
                let tp = self.counts[k][k] as f32;
                let support: u32 = self.counts[k].iter().sum();
                let predicted: u32 = (0..CLASS_COUNT).map(|t| self.counts[t][k]).sum();
                let fn_ = support as f32 - tp;
                let fp = predicted as f32 - tp;
                let precision = if tp + fp == 0.0 { 0.0 } else { tp / (tp + fp) };
                let recall = if tp + fn_ == 0.0 { 0.0 } else { tp / (tp + fn_) };
                ClassStats { label, precision, recall, support }
            })
            .collect()
    }

    pub fn log(&self) {
        info!(accuracy = format!("{:.4}", self.accuracy()), total = %self.total(), "validation_report");
        for stats in self.class_stats() {
            let row = self.counts[stats.label.index()];
            info!(
                class = %stats.label,
                support = %stats.support,
                precision = format!("{:.3}", stats.precision),
                recall = format!("{:.3}", stats.recall),
                predicted_low = %row[0],
                predicted_medium = %row[1],
                predicted_high = %row[2],
                "validation_class"
            );
        }
    }
}
