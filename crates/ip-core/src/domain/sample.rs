//! Sample (C6): a leaf item describing one piece of audio data plus
//! its playback metadata. The sample bytes themselves live in a
//! [`crate::base::SampleStoreHandle`] owned by the sample's `Base`; the
//! `Sample` item only carries the metadata a voice cache needs to
//! flatten it into a playable voice.

use std::any::Any;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::base::SampleStoreHandle;
use crate::item::{Item, ItemHeader, ItemRef, LinkResolver, PropValue, UniqueKey};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoopPoints {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone)]
pub struct SampleInfo {
    pub sample_rate: u32,
    pub size_frames: u32,
    pub loop_points: LoopPoints,
    pub root_note: u8,
    pub fine_tune: i8,
}

impl Default for SampleInfo {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            size_frames: 0,
            loop_points: LoopPoints::default(),
            root_note: 60,
            fine_tune: 0,
        }
    }
}

pub struct Sample {
    header: ItemHeader,
    info: RwLock<SampleInfo>,
    store: RwLock<Option<SampleStoreHandle>>,
}

impl Default for Sample {
    fn default() -> Self {
        Self::new()
    }
}

impl Sample {
    pub fn new() -> Self {
        Self {
            header: ItemHeader::new(),
            info: RwLock::new(SampleInfo::default()),
            store: RwLock::new(None),
        }
    }

    pub fn info(&self) -> SampleInfo {
        self.info.read().clone()
    }

    pub fn set_info(&self, info: SampleInfo) {
        *self.info.write() = info;
    }

    pub fn store(&self) -> Option<SampleStoreHandle> {
        self.store.read().clone()
    }

    pub fn set_store(&self, store: Option<SampleStoreHandle>) {
        *self.store.write() = store;
    }
}

impl Item for Sample {
    fn header(&self) -> &ItemHeader {
        &self.header
    }

    fn type_name(&self) -> &'static str {
        "Sample"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn new_instance(&self) -> ItemRef {
        Arc::new(Sample::new())
    }

    fn copy_into(&self, dest: &dyn Item, _resolver: &LinkResolver) {
        if let Some(d) = dest.as_any().downcast_ref::<Sample>() {
            d.set_info(self.info());
            // Sample bytes are not duplicated implicitly: a deep
            // duplicate of a Sample without its own converter shares
            // the same backing store (matches the original's "samples
            // migrate, they don't silently fork" save-pipeline model).
            *d.store.write() = self.store.read().clone();
        }
    }

    fn unique_key(&self) -> Option<UniqueKey> {
        Some(UniqueKey {
            group: "name",
            values: vec![PropValue::Str(self.header().name().unwrap_or_default())],
        })
    }
}
