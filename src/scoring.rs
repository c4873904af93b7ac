//! Probabilistic sender classification.
//!
//! Converts the aggregated per-key features into an automation likelihood
//! and a discrete label. Every weight, threshold and control point lives
//! in `ScoringParams` so the model shape can be tuned and tested without
//! touching the algorithm.

use serde::{Deserialize, Serialize};

use crate::aggregate::MessageAgg;
use crate::metrics::AggMetrics;

/// Discrete classification of a sender identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SenderLabel {
    LikelyHuman,
    HighProbabilityApp,
    LowVolumeAutomatedSource,
    MediumProbabilityApp,
    UnknownAmbiguous,
}

impl SenderLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderLabel::LikelyHuman => "Likely Human",
            SenderLabel::HighProbabilityApp => "High Probability App",
            SenderLabel::LowVolumeAutomatedSource => "Low-Volume Automated Source",
            SenderLabel::MediumProbabilityApp => "Medium Probability App",
            SenderLabel::UnknownAmbiguous => "Unknown/Ambiguous",
        }
    }

    /// Fixed per-label base used only for result ordering. Bands never
    /// overlap because the rank contribution is capped below 0.1.
    pub fn base_score(&self) -> f64 {
        match self {
            SenderLabel::LikelyHuman => 0.05,
            SenderLabel::HighProbabilityApp => 0.90,
            SenderLabel::LowVolumeAutomatedSource => 0.55,
            SenderLabel::MediumProbabilityApp => 0.70,
            SenderLabel::UnknownAmbiguous => 0.30,
        }
    }
}

/// Scores derived for one grouping key. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct SenderScore {
    pub p_template: f64,
    pub p_volume: f64,
    pub p_app_like: f64,
    pub p_human: f64,
    pub p_final: f64,
    pub rank: f64,
    pub label: SenderLabel,
    pub sort_score: f64,
}

/// Tunable model constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringParams {
    // template score: weights and centers of the linear features
    pub w_top_mass: f64,
    pub c_top_mass: f64,
    pub w_top3_mass: f64,
    pub c_top3_mass: f64,
    pub w_top1_ratio: f64,
    pub c_top1_ratio: f64,
    pub w_concentration: f64,
    pub c_concentration: f64,
    pub w_reply_penalty: f64,
    pub c_reply_penalty: f64,
    pub sigmoid_gain: f64,
    /// Prior the template score shrinks toward on low samples.
    pub low_sample_prior: f64,
    /// Message count at which the template score is fully trusted.
    pub full_confidence_messages: u64,

    /// Control points of the messages/day volume prior.
    pub volume_curve: Vec<(f64, f64)>,
    /// Share of the volume prior admitted on top of the template score.
    pub volume_blend: f64,

    pub human_reply_gain: f64,
    pub human_reply_center: f64,
    pub human_volume_gain: f64,
    pub human_volume_center: f64,

    /// Reply-ratio caps on the final probability.
    pub reply_cap_mid: f64,
    pub reply_cap_mid_limit: f64,
    pub reply_cap_high: f64,
    pub reply_cap_high_limit: f64,

    // label thresholds
    pub human_label_threshold: f64,
    pub high_volume_per_day: f64,
    pub low_volume_per_day: f64,
    pub quiet_reply_ratio: f64,
    pub dominant_top1_ratio: f64,

    // rank blend
    pub rank_base_weight: f64,
    pub rank_volume_weight: f64,
    pub rank_reply_weight: f64,
    pub rank_low_volume_floor: f64,
    pub rank_human_cap: f64,
    /// Spread of the rank inside a label band.
    pub sort_rank_span: f64,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            w_top_mass: 3.0,
            c_top_mass: 0.60,
            w_top3_mass: 2.0,
            c_top3_mass: 0.75,
            w_top1_ratio: 1.5,
            c_top1_ratio: 0.30,
            w_concentration: 2.5,
            c_concentration: 0.35,
            w_reply_penalty: 3.0,
            c_reply_penalty: 0.20,
            sigmoid_gain: 4.0,
            low_sample_prior: 0.20,
            full_confidence_messages: 25,
            volume_curve: vec![
                (0.0, 0.05),
                (5.0, 0.10),
                (25.0, 0.35),
                (50.0, 0.90),
                (75.0, 0.97),
                (100.0, 0.99),
            ],
            volume_blend: 0.35,
            human_reply_gain: 14.0,
            human_reply_center: 0.30,
            human_volume_gain: 0.18,
            human_volume_center: 25.0,
            reply_cap_mid: 0.30,
            reply_cap_mid_limit: 0.20,
            reply_cap_high: 0.40,
            reply_cap_high_limit: 0.10,
            human_label_threshold: 0.40,
            high_volume_per_day: 20.0,
            low_volume_per_day: 1.0,
            quiet_reply_ratio: 0.02,
            dominant_top1_ratio: 0.95,
            rank_base_weight: 0.75,
            rank_volume_weight: 0.15,
            rank_reply_weight: 0.10,
            rank_low_volume_floor: 0.60,
            rank_human_cap: 0.10,
            sort_rank_span: 0.099,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

/// Normalized Shannon entropy in [0,1] over the tracked template counts
/// plus one synthetic tail bucket for the untracked mass. Returns 0 with
/// fewer than two non-zero buckets.
pub fn normalized_entropy(counts: &[u64], total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }

    let tracked: u64 = counts.iter().sum();
    let tail = total.saturating_sub(tracked);

    let mut probs: Vec<f64> = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| c as f64 / total as f64)
        .collect();
    if tail > 0 {
        probs.push(tail as f64 / total as f64);
    }

    if probs.len() <= 1 {
        return 0.0;
    }

    let h: f64 = probs.iter().map(|p| -p * p.log2()).sum();
    let h_max = (probs.len() as f64).log2();
    if h_max > 0.0 {
        h / h_max
    } else {
        0.0
    }
}

/// Engine applying one parameter set to aggregated features.
///
/// `compute` is a pure function of the aggregate and may run concurrently
/// for different keys.
pub struct ScoringEngine {
    params: ScoringParams,
    report_top_n: usize,
}

impl ScoringEngine {
    pub fn new(params: ScoringParams, report_top_n: usize) -> Self {
        Self {
            params,
            report_top_n: report_top_n.max(1),
        }
    }

    pub fn params(&self) -> &ScoringParams {
        &self.params
    }

    /// Template regularity score: a linear feature blend through a logistic
    /// sigmoid, shrunk toward a prior when the sample is small.
    pub fn app_probability(
        &self,
        messages: u64,
        top_mass: f64,
        top3_mass: f64,
        top1_ratio: f64,
        entropy: f64,
        reply_ratio: f64,
    ) -> f64 {
        if messages == 0 {
            return 0.0;
        }
        let p = &self.params;

        let top_mass = clamp01(top_mass);
        let top3_mass = clamp01(top3_mass);
        let top1_ratio = clamp01(top1_ratio);
        let entropy = clamp01(entropy);
        let reply_ratio = clamp01(reply_ratio);

        let mut score = p.w_top_mass * (top_mass - p.c_top_mass)
            + p.w_top3_mass * (top3_mass - p.c_top3_mass)
            + p.w_top1_ratio * (top1_ratio - p.c_top1_ratio)
            + p.w_concentration * ((1.0 - entropy) - p.c_concentration);
        score -= p.w_reply_penalty * (reply_ratio - p.c_reply_penalty);

        let p_signal = sigmoid(p.sigmoid_gain * score);

        let confidence = (messages as f64 / p.full_confidence_messages as f64).min(1.0);
        p.low_sample_prior * (1.0 - confidence) + p_signal * confidence
    }

    /// Piecewise-linear volume prior over messages/day, clamped at the
    /// curve's ends.
    pub fn volume_prior(&self, per_day: f64) -> f64 {
        let pts = &self.params.volume_curve;
        let r = per_day.max(0.0);

        if pts.is_empty() {
            return 0.0;
        }
        if r <= pts[0].0 {
            return pts[0].1;
        }
        if r >= pts[pts.len() - 1].0 {
            return pts[pts.len() - 1].1;
        }
        for w in pts.windows(2) {
            let ((x0, y0), (x1, y1)) = (w[0], w[1]);
            if r >= x0 && r <= x1 {
                let t = if x1 > x0 { (r - x0) / (x1 - x0) } else { 0.0 };
                return y0 + t * (y1 - y0);
            }
        }
        pts[pts.len() - 1].1
    }

    /// Template-first combination: volume can amplify app-likeness but
    /// never create it on its own.
    pub fn combine_probabilities(&self, p_template: f64, p_volume: f64) -> f64 {
        let p_template = clamp01(p_template);
        let p_volume = clamp01(p_volume);
        p_template + (1.0 - p_template) * p_volume.powi(2) * self.params.volume_blend
    }

    /// Human likelihood from reply behavior, gated down as volume grows.
    pub fn human_probability(&self, reply_ratio: f64, per_day: f64) -> f64 {
        let p = &self.params;
        let rr = clamp01(reply_ratio);
        let rpd = per_day.max(0.0);

        let rr_score = sigmoid(p.human_reply_gain * (rr - p.human_reply_center));
        let vol_gate = 1.0 - sigmoid(p.human_volume_gain * (rpd - p.human_volume_center));
        rr_score * vol_gate
    }

    pub fn classify(
        &self,
        per_day: f64,
        reply_ratio: f64,
        p_human: f64,
        top1_ratio: f64,
    ) -> SenderLabel {
        let p = &self.params;

        if p_human >= p.human_label_threshold {
            return SenderLabel::LikelyHuman;
        }
        if per_day >= p.high_volume_per_day {
            return SenderLabel::HighProbabilityApp;
        }
        if per_day < p.low_volume_per_day
            && reply_ratio <= p.quiet_reply_ratio
            && top1_ratio >= p.dominant_top1_ratio
        {
            return SenderLabel::LowVolumeAutomatedSource;
        }
        if per_day >= p.low_volume_per_day && reply_ratio <= p.quiet_reply_ratio {
            return SenderLabel::MediumProbabilityApp;
        }
        SenderLabel::UnknownAmbiguous
    }

    /// Ordering score inside a label band: mostly the human-suppressed
    /// app-likeness, nudged by volume and reply-silence boosts.
    #[allow(clippy::too_many_arguments)]
    pub fn autonomy_score(
        &self,
        p_app_like: f64,
        p_human: f64,
        per_day: f64,
        reply_ratio: f64,
        top1_ratio: f64,
    ) -> f64 {
        let p = &self.params;
        let p_app_like = clamp01(p_app_like);
        let p_human = clamp01(p_human);

        let base = p_app_like * (1.0 - p_human);
        let vol_boost = (per_day / p.high_volume_per_day).min(1.0);
        let rr_boost = ((p.human_reply_center - reply_ratio) / p.human_reply_center).clamp(0.0, 1.0);
        let lowvol_auto = per_day < p.low_volume_per_day
            && reply_ratio == 0.0
            && top1_ratio >= p.dominant_top1_ratio;

        let mut score = base * p.rank_base_weight
            + vol_boost * p.rank_volume_weight
            + rr_boost * p.rank_reply_weight;

        if lowvol_auto {
            score = score.max(p.rank_low_volume_floor);
        }
        if p_human >= p.human_label_threshold {
            score = score.min(p.rank_human_cap);
        }

        clamp01(score)
    }

    /// Full score for one aggregated key over `days` observed days.
    pub fn compute(&self, agg: &MessageAgg, days: f64) -> SenderScore {
        let m = AggMetrics::compute(agg, days, self.report_top_n);
        self.compute_from_metrics(&m)
    }

    pub fn compute_from_metrics(&self, m: &AggMetrics) -> SenderScore {
        let p = &self.params;

        let p_template = self.app_probability(
            m.total_messages,
            m.top_mass,
            m.top3_mass,
            m.top1_ratio,
            m.entropy,
            m.reply_ratio,
        );
        let p_volume = self.volume_prior(m.messages_per_day);
        let p_app_like = self.combine_probabilities(p_template, p_volume);
        let p_human = self.human_probability(m.reply_ratio, m.messages_per_day);

        let mut p_final = p_app_like * (1.0 - p_human);
        if m.reply_ratio >= p.reply_cap_high {
            p_final = p_final.min(p.reply_cap_high_limit);
        } else if m.reply_ratio >= p.reply_cap_mid {
            p_final = p_final.min(p.reply_cap_mid_limit);
        }

        let label = self.classify(m.messages_per_day, m.reply_ratio, p_human, m.top1_ratio);
        let rank = self.autonomy_score(
            p_app_like,
            p_human,
            m.messages_per_day,
            m.reply_ratio,
            m.top1_ratio,
        );

        let sort_score = label.base_score() + clamp01(rank) * p.sort_rank_span;

        SenderScore {
            p_template,
            p_volume,
            p_app_like,
            p_human,
            p_final,
            rank,
            label,
            sort_score,
        }
    }
}

impl Default for ScoringEngine {
    fn default() -> Self {
        Self::new(ScoringParams::default(), 50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::MessageAgg;

    fn engine() -> ScoringEngine {
        ScoringEngine::default()
    }

    #[test]
    fn test_entropy_bounds() {
        assert_eq!(normalized_entropy(&[], 0), 0.0);
        assert_eq!(normalized_entropy(&[10], 10), 0.0);
        assert_eq!(normalized_entropy(&[], 10), 0.0);

        // two equal buckets: maximum entropy
        let e = normalized_entropy(&[5, 5], 10);
        assert!((e - 1.0).abs() < 1e-12);

        // tracked plus tail bucket
        let e = normalized_entropy(&[6], 10);
        assert!(e > 0.0 && e <= 1.0);

        let e = normalized_entropy(&[50, 30, 10, 5], 100);
        assert!((0.0..=1.0).contains(&e));
    }

    #[test]
    fn test_volume_prior_control_points() {
        let s = engine();
        assert!((s.volume_prior(0.0) - 0.05).abs() < 1e-12);
        assert!((s.volume_prior(5.0) - 0.10).abs() < 1e-12);
        assert!((s.volume_prior(25.0) - 0.35).abs() < 1e-12);
        assert!((s.volume_prior(50.0) - 0.90).abs() < 1e-12);
        assert!((s.volume_prior(100.0) - 0.99).abs() < 1e-12);
        // clamped ends and interpolated middles
        assert!((s.volume_prior(-3.0) - 0.05).abs() < 1e-12);
        assert!((s.volume_prior(500.0) - 0.99).abs() < 1e-12);
        let mid = s.volume_prior(37.5);
        assert!((mid - 0.625).abs() < 1e-9);
    }

    #[test]
    fn test_app_probability_shrinks_on_low_samples() {
        let s = engine();
        // perfectly regular traffic, but a single message
        let low = s.app_probability(1, 1.0, 1.0, 1.0, 0.0, 0.0);
        let high = s.app_probability(100, 1.0, 1.0, 1.0, 0.0, 0.0);
        assert!(low < high);
        // with one message, 96% of the weight stays on the prior
        assert!(low < 0.30);
        assert!(high > 0.95);
        assert_eq!(s.app_probability(0, 1.0, 1.0, 1.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_combine_volume_only_amplifies() {
        let s = engine();
        // no template signal and no volume: nothing appears
        assert!(s.combine_probabilities(0.0, 0.0) < 1e-12);
        // volume alone is bounded by the blend share
        let v = s.combine_probabilities(0.0, 1.0);
        assert!((v - 0.35).abs() < 1e-12);
        // template signal passes through unchanged at zero volume
        assert!((s.combine_probabilities(0.8, 0.0) - 0.8).abs() < 1e-12);
        assert!(s.combine_probabilities(0.8, 0.9) >= 0.8);
    }

    #[test]
    fn test_human_probability_gates() {
        let s = engine();
        // chatty low-volume sender is human-like
        let h = s.human_probability(0.6, 2.0);
        assert!(h > 0.8);
        // same reply ratio at high volume is gated down
        let h_busy = s.human_probability(0.6, 200.0);
        assert!(h_busy < 0.05);
        // silent sender is not human-like
        assert!(s.human_probability(0.0, 2.0) < 0.05);
    }

    #[test]
    fn test_classify_labels() {
        let s = engine();
        assert_eq!(s.classify(5.0, 0.5, 0.9, 0.2), SenderLabel::LikelyHuman);
        assert_eq!(s.classify(25.0, 0.0, 0.0, 0.2), SenderLabel::HighProbabilityApp);
        assert_eq!(
            s.classify(0.5, 0.0, 0.0, 0.99),
            SenderLabel::LowVolumeAutomatedSource
        );
        assert_eq!(s.classify(5.0, 0.0, 0.0, 0.2), SenderLabel::MediumProbabilityApp);
        assert_eq!(s.classify(0.5, 0.1, 0.0, 0.2), SenderLabel::UnknownAmbiguous);
    }

    #[test]
    fn test_rank_floors_and_caps() {
        let s = engine();
        // low-volume automated floor
        let r = s.autonomy_score(0.1, 0.0, 0.2, 0.0, 1.0);
        assert!(r >= 0.60);
        // human cap
        let r = s.autonomy_score(0.9, 0.9, 30.0, 0.5, 0.2);
        assert!(r <= 0.10);
    }

    #[test]
    fn test_sort_bands_never_overlap() {
        let s = engine();
        // worst-ranked high probability app still sorts above the best
        // medium probability app
        let high_floor = SenderLabel::HighProbabilityApp.base_score();
        let medium_ceiling =
            SenderLabel::MediumProbabilityApp.base_score() + s.params.sort_rank_span;
        assert!(high_floor > medium_ceiling);
        let medium_floor = SenderLabel::MediumProbabilityApp.base_score();
        let lowvol_ceiling =
            SenderLabel::LowVolumeAutomatedSource.base_score() + s.params.sort_rank_span;
        assert!(medium_floor > lowvol_ceiling);
    }

    #[test]
    fn test_reply_ratio_caps_final_probability() {
        let s = engine();
        let mut agg = MessageAgg::default();
        // heavy, template-stable traffic with many replies
        for i in 0..100 {
            let reply = i % 2 == 0;
            agg.add_message(500, "re: thread {i}", "Re: thread 1", reply, None, 1);
        }
        let score = s.compute(&agg, 2.0);
        assert!(score.p_final <= 0.10 + 1e-12);
    }

    #[test]
    fn test_compute_automated_sender_end_to_end() {
        let s = engine();
        let mut agg = MessageAgg::default();
        for _ in 0..200 {
            agg.add_message(1200, "invoice {i} due {d}", "Invoice 5 due Dec 1", false, None, 2);
        }
        let score = s.compute(&agg, 4.0);
        assert_eq!(score.label, SenderLabel::HighProbabilityApp);
        assert!(score.p_app_like > 0.9);
        assert!(score.p_human < 0.05);
        assert!(score.sort_score >= 0.90);

        // a quiet conversational sender lands at the other end
        let mut human = MessageAgg::default();
        for i in 0..10 {
            human.add_message(800, &format!("t{i}"), "misc", i % 2 == 0, None, 1);
        }
        let hs = s.compute(&human, 10.0);
        assert_eq!(hs.label, SenderLabel::LikelyHuman);
        assert!(hs.sort_score < score.sort_score);
    }

    #[test]
    fn test_compute_zero_days_is_zero_volume() {
        let s = engine();
        let mut agg = MessageAgg::default();
        agg.add_message(100, "t", "s", false, None, 1);
        let score = s.compute(&agg, 0.0);
        assert!((score.p_volume - 0.05).abs() < 1e-12);
    }
}
