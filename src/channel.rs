//! Fixed-capacity channel table with subscription state.

use heapless::Vec;

use crate::crypto::{AeadKey, VerifyKey};

/// One broadcast slot plus eight subscribable channels.
pub const MAX_CHANNELS: usize = 9;
/// Channel 0 is the broadcast channel; it cannot be (re)subscribed.
pub const BROADCAST_CHANNEL_ID: u32 = 0;

/// A channel slot: identity, its flash page, and subscription state.
/// Slots are created lazily on first subscription and never destroyed
/// before reboot; clearing a subscription keeps the id, page and window
/// so the channel still shows up in listings.
pub struct Channel {
    id: u32,
    flash_page: u8,
    active: bool,
    start_time: u64,
    end_time: u64,
    aead_key: AeadKey,
    verify_key: VerifyKey,
}

impl Channel {
    fn new(id: u32, flash_page: u8) -> Self {
        Self {
            id,
            flash_page,
            active: false,
            start_time: 0,
            end_time: 0,
            aead_key: AeadKey::zeroed(),
            verify_key: VerifyKey::zeroed(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn flash_page(&self) -> u8 {
        self.flash_page
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    pub fn end_time(&self) -> u64 {
        self.end_time
    }

    pub fn aead_key(&self) -> &AeadKey {
        &self.aead_key
    }

    pub fn verify_key(&self) -> &VerifyKey {
        &self.verify_key
    }

    /// Loads an active subscription. The subscription path calls this
    /// twice in a row with identical arguments (anti-glitch).
    pub fn set_subscription(
        &mut self,
        start_time: u64,
        end_time: u64,
        verify_key: &VerifyKey,
        aead_key: &AeadKey,
    ) {
        self.active = true;
        self.start_time = start_time;
        self.end_time = end_time;
        self.verify_key = verify_key.clone();
        self.aead_key = aead_key.clone();
    }

    /// Deactivates the subscription and zeroes both channel keys.
    pub fn clear_subscription(&mut self) {
        self.active = false;
        self.verify_key.clear();
        self.aead_key.clear();
    }
}

/// All known channels plus the monotonic last-seen timestamp cursor.
pub struct ChannelTable {
    channels: Vec<Channel, MAX_CHANNELS>,
    last_seen_time: u64,
}

impl ChannelTable {
    /// Installs the broadcast channel in slot 0, active from time zero
    /// with an end time of `u64::MAX` ("never expires"). The early-expiry
    /// check can therefore never trip for channel 0 as long as the host
    /// never presents a timestamp of `2^64 - 1`.
    pub fn new(channel0_verify_key: &VerifyKey, channel0_key: &AeadKey) -> Self {
        let mut channel0 = Channel::new(BROADCAST_CHANNEL_ID, 0);
        channel0.set_subscription(0, u64::MAX, channel0_verify_key, channel0_key);
        let mut channels = Vec::new();
        // Capacity is MAX_CHANNELS; the first push cannot fail.
        let _ = channels.push(channel0);
        Self {
            channels,
            last_seen_time: 0,
        }
    }

    /// Index of the channel with the given id.
    pub fn find(&self, id: u32) -> Option<usize> {
        self.channels.iter().position(|channel| channel.id == id)
    }

    /// Index of the channel with the given id, appending a new slot when
    /// necessary. New slots take the next flash page (1..=8). Returns
    /// `None` when the table is full.
    pub fn get_or_create(&mut self, id: u32) -> Option<usize> {
        if let Some(index) = self.find(id) {
            return Some(index);
        }
        let page = self.channels.len() as u8;
        self.channels.push(Channel::new(id, page)).ok()?;
        Some(self.channels.len() - 1)
    }

    pub fn channel(&self, index: usize) -> &Channel {
        &self.channels[index]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut Channel {
        &mut self.channels[index]
    }

    /// Every channel except broadcast, in first-insertion order.
    pub fn nonzero(&self) -> impl Iterator<Item = &Channel> {
        self.channels
            .iter()
            .filter(|channel| channel.id != BROADCAST_CHANNEL_ID)
    }

    /// Largest timestamp ever seen in a successfully decoded frame.
    pub fn last_seen_time(&self) -> u64 {
        self.last_seen_time
    }

    /// Advances the cursor. The cursor never moves backwards.
    pub fn set_last_seen_time(&mut self, time: u64) {
        if time > self.last_seen_time {
            self.last_seen_time = time;
        }
    }
}
