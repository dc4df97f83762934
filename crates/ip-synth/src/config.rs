//! Configuration interface (§6): reverb/chorus/interpolation scalar
//! options, the active/solo item handles, and the session-override
//! modulator list. Setting any individual reverb/chorus parameter
//! clears that group's preset name; changes made inside a
//! `begin_set`/`end_set` bracket (a multi-property `set`) are applied
//! to the registered commit hook once, when the outermost bracket
//! closes, rather than once per property.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use ip_core::item::ItemRef;
use ip_core::modulator::ModulatorList;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interp {
    None,
    Linear,
    FourthOrder,
    SeventhOrder,
}

#[derive(Debug, Clone)]
pub struct ReverbParams {
    pub preset: Option<String>,
    pub room_size: f64,
    pub damp: f64,
    pub width: f64,
    pub level: f64,
}

impl Default for ReverbParams {
    fn default() -> Self {
        Self {
            preset: None,
            room_size: 0.2,
            damp: 0.0,
            width: 0.5,
            level: 0.9,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChorusParams {
    pub preset: Option<String>,
    pub count: u32,
    pub level: f64,
    pub freq: f64,
    pub depth: f64,
    pub waveform: Waveform,
}

impl Default for ChorusParams {
    fn default() -> Self {
        Self {
            preset: None,
            count: 3,
            level: 2.0,
            freq: 0.3,
            depth: 8.0,
            waveform: Waveform::Sine,
        }
    }
}

/// "yes"/"no" serialization for string-boolean driver options (§6).
pub fn bool_to_yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

pub fn yes_no_to_bool(value: &str) -> Result<bool> {
    match value {
        "yes" => Ok(true),
        "no" => Ok(false),
        other => Err(Error::Invalid(format!("expected \"yes\" or \"no\", got {other:?}"))),
    }
}

type ReverbHook = Arc<dyn Fn(&ReverbParams) + Send + Sync>;
type ChorusHook = Arc<dyn Fn(&ChorusParams) + Send + Sync>;

/// The dynamic scalar option set a driver exposes at startup (§6
/// "Configuration interface"), plus the active/solo item handles and
/// session-override modulators the bridge reads when building a cache.
pub struct Config {
    reverb: RwLock<ReverbParams>,
    chorus: RwLock<ChorusParams>,
    interp: RwLock<Interp>,
    active_item: RwLock<Option<ItemRef>>,
    solo_item: RwLock<Option<ItemRef>>,
    modulators: RwLock<ModulatorList>,
    batch_depth: AtomicU32,
    dirty_reverb: AtomicBool,
    dirty_chorus: AtomicBool,
    reverb_hook: RwLock<Option<ReverbHook>>,
    chorus_hook: RwLock<Option<ChorusHook>>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            reverb: RwLock::new(ReverbParams::default()),
            chorus: RwLock::new(ChorusParams::default()),
            interp: RwLock::new(Interp::FourthOrder),
            active_item: RwLock::new(None),
            solo_item: RwLock::new(None),
            modulators: RwLock::new(ModulatorList::new()),
            batch_depth: AtomicU32::new(0),
            dirty_reverb: AtomicBool::new(false),
            dirty_chorus: AtomicBool::new(false),
            reverb_hook: RwLock::new(None),
            chorus_hook: RwLock::new(None),
        }
    }

    pub fn set_reverb_commit_hook(&self, hook: impl Fn(&ReverbParams) + Send + Sync + 'static) {
        *self.reverb_hook.write() = Some(Arc::new(hook));
    }

    pub fn set_chorus_commit_hook(&self, hook: impl Fn(&ChorusParams) + Send + Sync + 'static) {
        *self.chorus_hook.write() = Some(Arc::new(hook));
    }

    pub fn reverb(&self) -> ReverbParams {
        self.reverb.read().clone()
    }

    pub fn chorus(&self) -> ChorusParams {
        self.chorus.read().clone()
    }

    pub fn interp(&self) -> Interp {
        *self.interp.read()
    }

    /// Opens a multi-property `set` bracket: reverb/chorus param writes
    /// made until the matching `end_set` are committed once, not per
    /// write. Brackets nest; only the outermost `end_set` commits.
    pub fn begin_set(&self) {
        self.batch_depth.fetch_add(1, Ordering::AcqRel);
    }

    pub fn end_set(&self) {
        if self.batch_depth.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if self.dirty_reverb.swap(false, Ordering::AcqRel) {
            self.commit_reverb();
        }
        if self.dirty_chorus.swap(false, Ordering::AcqRel) {
            self.commit_chorus();
        }
    }

    fn commit_reverb(&self) {
        if let Some(hook) = self.reverb_hook.read().clone() {
            hook(&self.reverb.read());
        }
    }

    fn commit_chorus(&self) {
        if let Some(hook) = self.chorus_hook.read().clone() {
            hook(&self.chorus.read());
        }
    }

    fn touch_reverb(&self) {
        if self.batch_depth.load(Ordering::Acquire) > 0 {
            self.dirty_reverb.store(true, Ordering::Release);
        } else {
            self.commit_reverb();
        }
    }

    fn touch_chorus(&self) {
        if self.batch_depth.load(Ordering::Acquire) > 0 {
            self.dirty_chorus.store(true, Ordering::Release);
        } else {
            self.commit_chorus();
        }
    }

    pub fn set_reverb_preset(&self, name: impl Into<String>) {
        self.reverb.write().preset = Some(name.into());
        self.touch_reverb();
    }

    pub fn set_reverb_room_size(&self, value: f64) -> Result<()> {
        check_range("reverb-room-size", value, 0.0, 1.0)?;
        let mut r = self.reverb.write();
        r.room_size = value;
        r.preset = None;
        drop(r);
        self.touch_reverb();
        Ok(())
    }

    pub fn set_reverb_damp(&self, value: f64) -> Result<()> {
        check_range("reverb-damp", value, 0.0, 1.0)?;
        let mut r = self.reverb.write();
        r.damp = value;
        r.preset = None;
        drop(r);
        self.touch_reverb();
        Ok(())
    }

    pub fn set_reverb_width(&self, value: f64) -> Result<()> {
        check_range("reverb-width", value, 0.0, 100.0)?;
        let mut r = self.reverb.write();
        r.width = value;
        r.preset = None;
        drop(r);
        self.touch_reverb();
        Ok(())
    }

    pub fn set_reverb_level(&self, value: f64) -> Result<()> {
        check_range("reverb-level", value, 0.0, 1.0)?;
        let mut r = self.reverb.write();
        r.level = value;
        r.preset = None;
        drop(r);
        self.touch_reverb();
        Ok(())
    }

    pub fn set_chorus_preset(&self, name: impl Into<String>) {
        self.chorus.write().preset = Some(name.into());
        self.touch_chorus();
    }

    pub fn set_chorus_count(&self, value: u32) -> Result<()> {
        if !(1..=99).contains(&value) {
            return Err(Error::Invalid(format!("chorus-count must be in 1..=99, got {value}")));
        }
        let mut c = self.chorus.write();
        c.count = value;
        c.preset = None;
        drop(c);
        self.touch_chorus();
        Ok(())
    }

    pub fn set_chorus_level(&self, value: f64) -> Result<()> {
        check_range("chorus-level", value, 0.0, 10.0)?;
        let mut c = self.chorus.write();
        c.level = value;
        c.preset = None;
        drop(c);
        self.touch_chorus();
        Ok(())
    }

    pub fn set_chorus_freq(&self, value: f64) -> Result<()> {
        check_range("chorus-freq", value, 0.3, 5.0)?;
        let mut c = self.chorus.write();
        c.freq = value;
        c.preset = None;
        drop(c);
        self.touch_chorus();
        Ok(())
    }

    pub fn set_chorus_depth(&self, value: f64) -> Result<()> {
        check_range("chorus-depth", value, 0.0, 20.0)?;
        let mut c = self.chorus.write();
        c.depth = value;
        c.preset = None;
        drop(c);
        self.touch_chorus();
        Ok(())
    }

    pub fn set_chorus_waveform(&self, value: Waveform) {
        let mut c = self.chorus.write();
        c.waveform = value;
        c.preset = None;
        drop(c);
        self.touch_chorus();
    }

    pub fn set_interp(&self, value: Interp) {
        *self.interp.write() = value;
    }

    pub fn active_item(&self) -> Option<ItemRef> {
        self.active_item.read().clone()
    }

    pub fn set_active_item(&self, item: Option<ItemRef>) {
        *self.active_item.write() = item;
    }

    pub fn solo_item(&self) -> Option<ItemRef> {
        self.solo_item.read().clone()
    }

    pub fn set_solo_item(&self, item: Option<ItemRef>) {
        *self.solo_item.write() = item;
    }

    pub fn modulators(&self) -> ModulatorList {
        self.modulators.read().clone()
    }

    pub fn set_modulators(&self, mods: ModulatorList) {
        *self.modulators.write() = mods;
    }
}

fn check_range(name: &str, value: f64, low: f64, high: f64) -> Result<()> {
    if value < low || value > high {
        Err(Error::Invalid(format!("{name} must be in {low}..={high}, got {value}")))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn setting_a_param_clears_the_preset_name() {
        let config = Config::new();
        config.set_reverb_preset("Hall");
        assert_eq!(config.reverb().preset.as_deref(), Some("Hall"));
        config.set_reverb_room_size(0.5).unwrap();
        assert!(config.reverb().preset.is_none());
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        let config = Config::new();
        assert!(matches!(config.set_reverb_room_size(1.5), Err(Error::Invalid(_))));
        assert!(matches!(config.set_chorus_count(0), Err(Error::Invalid(_))));
        assert!(matches!(config.set_chorus_freq(10.0), Err(Error::Invalid(_))));
    }

    #[test]
    fn immediate_set_commits_right_away() {
        let config = Config::new();
        let commits = Arc::new(AtomicUsize::new(0));
        let c2 = commits.clone();
        config.set_reverb_commit_hook(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        config.set_reverb_level(0.5).unwrap();
        assert_eq!(commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn batched_set_commits_once_at_end_set() {
        let config = Config::new();
        let commits = Arc::new(AtomicUsize::new(0));
        let c2 = commits.clone();
        config.set_reverb_commit_hook(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        config.begin_set();
        config.set_reverb_room_size(0.3).unwrap();
        config.set_reverb_damp(0.1).unwrap();
        config.set_reverb_level(0.8).unwrap();
        assert_eq!(commits.load(Ordering::SeqCst), 0);
        config.end_set();
        assert_eq!(commits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bool_string_roundtrip() {
        assert_eq!(bool_to_yes_no(true), "yes");
        assert_eq!(bool_to_yes_no(false), "no");
        assert!(yes_no_to_bool("yes").unwrap());
        assert!(!yes_no_to_bool("no").unwrap());
        assert!(yes_no_to_bool("maybe").is_err());
    }
}
