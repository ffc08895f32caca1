use serde_json::Value;
use std::str::FromStr;

use crate::protocol::{
    Band, ChannelMix, Distortion, Filters, Karaoke, LowPass, Oscillation, Rotation, Timescale,
};

/// Nodes expose a 15 band equalizer.
pub const EQ_BANDS: u8 = 15;

const MIN_GAIN: f32 = -0.25;
const MAX_GAIN: f32 = 1.0;

/// Gains in dB for the ten lower bands; upper bands follow the last one.
const PRESET_DB: [(EqualizerPreset, [f32; 10]); 8] = [
    (EqualizerPreset::Flat, [0.0; 10]),
    (EqualizerPreset::Bass, [6.0, 5.0, 4.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]),
    (EqualizerPreset::Pop, [-1.0, 2.0, 4.0, 5.0, 3.0, 0.0, -1.0, -1.0, 0.0, 0.0]),
    (EqualizerPreset::Rock, [5.0, 4.0, 3.0, 1.0, -1.0, -1.0, 0.0, 2.0, 3.0, 4.0]),
    (EqualizerPreset::Jazz, [0.0, 1.0, 2.0, 3.0, 2.0, 1.0, 0.0, 1.0, 2.0, 3.0]),
    (EqualizerPreset::Classical, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, -2.0, -2.0, -2.0, -3.0]),
    (EqualizerPreset::Electronic, [5.0, 4.0, 1.0, 0.0, -2.0, 2.0, 1.0, 0.0, 3.0, 4.0]),
    (EqualizerPreset::Vocal, [-2.0, -1.0, 0.0, 2.0, 4.0, 3.0, 2.0, 1.0, 0.0, -1.0]),
];

/// Named equalizer presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualizerPreset {
    Flat,
    Bass,
    Pop,
    Rock,
    Jazz,
    Classical,
    Electronic,
    Vocal,
}

impl EqualizerPreset {
    pub fn list() -> Vec<&'static str> {
        vec![
            "flat",
            "bass",
            "pop",
            "rock",
            "jazz",
            "classical",
            "electronic",
            "vocal",
        ]
    }

    /// Node bands for this preset (dB scaled to the node's gain range).
    pub fn bands(self) -> Vec<Band> {
        let db = PRESET_DB
            .iter()
            .find(|(preset, _)| *preset == self)
            .map(|(_, gains)| *gains)
            .unwrap_or([0.0; 10]);

        (0..EQ_BANDS)
            .map(|band| {
                let gain = db[usize::from(band).min(db.len() - 1)] * 0.025;
                Band {
                    band,
                    gain: gain.clamp(MIN_GAIN, MAX_GAIN),
                }
            })
            .collect()
    }
}

impl FromStr for EqualizerPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "flat" | "normal" => Ok(Self::Flat),
            "bass" => Ok(Self::Bass),
            "pop" => Ok(Self::Pop),
            "rock" => Ok(Self::Rock),
            "jazz" => Ok(Self::Jazz),
            "classical" => Ok(Self::Classical),
            "electronic" => Ok(Self::Electronic),
            "vocal" => Ok(Self::Vocal),
            other => Err(format!("preset '{other}' not found")),
        }
    }
}

/// Fluent construction of a player's filter set.
#[derive(Debug, Clone, Default)]
pub struct FilterBuilder {
    filters: Filters,
}

impl FilterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an existing filter set (e.g. a cached player's).
    pub fn from_filters(filters: Filters) -> Self {
        Self { filters }
    }

    pub fn set_volume(mut self, volume: f32) -> Self {
        self.filters.volume = Some(volume.clamp(0.0, 5.0));
        self
    }

    pub fn set_equalizer(mut self, bands: Vec<Band>) -> Self {
        self.filters.equalizer = Some(bands);
        self
    }

    /// Replaces the gain of a single band, adding it when missing.
    pub fn set_band(mut self, band: u8, gain: f32) -> Self {
        let band_instance = Band {
            band: band.min(EQ_BANDS - 1),
            gain: gain.clamp(MIN_GAIN, MAX_GAIN),
        };
        let bands = self.filters.equalizer.get_or_insert_with(Vec::new);
        match bands.iter_mut().find(|b| b.band == band_instance.band) {
            Some(existing) => *existing = band_instance,
            None => bands.push(band_instance),
        }
        self
    }

    pub fn set_preset(self, preset: EqualizerPreset) -> Self {
        self.set_equalizer(preset.bands())
    }

    pub fn set_karaoke(mut self, karaoke: Option<Karaoke>) -> Self {
        self.filters.karaoke = karaoke;
        self
    }

    pub fn set_timescale(mut self, timescale: Option<Timescale>) -> Self {
        self.filters.timescale = timescale;
        self
    }

    pub fn set_tremolo(mut self, tremolo: Option<Oscillation>) -> Self {
        self.filters.tremolo = tremolo;
        self
    }

    pub fn set_vibrato(mut self, vibrato: Option<Oscillation>) -> Self {
        self.filters.vibrato = vibrato;
        self
    }

    pub fn set_distortion(mut self, distortion: Option<Distortion>) -> Self {
        self.filters.distortion = distortion;
        self
    }

    pub fn set_rotation(mut self, rotation: Option<Rotation>) -> Self {
        self.filters.rotation = rotation;
        self
    }

    pub fn set_channel_mix(mut self, channel_mix: Option<ChannelMix>) -> Self {
        self.filters.channel_mix = channel_mix;
        self
    }

    pub fn set_low_pass(mut self, low_pass: Option<LowPass>) -> Self {
        self.filters.low_pass = low_pass;
        self
    }

    pub fn set_plugin_filter(mut self, name: impl Into<String>, filter: Value) -> Self {
        self.filters.plugin_filters.insert(name.into(), filter);
        self
    }

    pub fn build(self) -> Filters {
        self.filters
    }
}
