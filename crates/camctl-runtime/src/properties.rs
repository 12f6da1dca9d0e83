//! Property accessors on [`CameraSession`].
//!
//! | Property | Device | Limits checked |
//! |---|---|---|
//! | exposure time (µs), gain (dB), sharpness, gamma | ✓ | ✓ |
//! | exposure / gain / white-balance auto mode, light source | ✓ | |
//! | frame width / height | ✓ | |
//! | RGB levels, negative, colour saturation, continuous AWB | cache only | |
//!
//! Device-backed getters run under momentary control, refresh the cache and
//! emit nothing.  Every successful setter updates the cache and emits
//! exactly one [`ChangeReason::Properties`] event; a failed setter leaves the
//! cache untouched and emits nothing.  Everything fails with
//! [`CamError::NotConnected`] while disconnected.

use camctl_hal::DeviceBinding;
use camctl_types::{
    AutoMode, CamError, CameraProperties, ChangeReason, ChannelLevels, LightSourcePreset, Limits,
};
use tracing::{debug, instrument};

use crate::session::CameraSession;

/// Re-read every device-backed property into `props`.  Software-only fields
/// are left alone.
pub(crate) fn read_device_properties(
    dev: &mut dyn DeviceBinding,
    props: &mut CameraProperties,
) -> Result<(), CamError> {
    props.width = dev.frame_width()?;
    props.height = dev.frame_height()?;
    props.exposure_time_us = dev.exposure_time_us()?;
    props.exposure_auto = dev.exposure_auto()?;
    props.gain_db = dev.gain_db()?;
    props.gain_auto = dev.gain_auto()?;
    props.sharpness = dev.sharpness()?;
    props.gamma = dev.gamma()?;
    props.white_balance_auto = dev.white_balance_auto()?;
    props.light_source = dev.light_source()?;
    Ok(())
}

fn ensure_within(property: &str, value: f64, limits: Limits<f64>) -> Result<(), CamError> {
    if limits.contains(value) {
        Ok(())
    } else {
        Err(CamError::OutOfRange {
            property: property.to_string(),
            value,
            min: limits.min,
            max: limits.max,
        })
    }
}

impl CameraSession {
    // ── Plumbing ────────────────────────────────────────────────────────

    fn read_device<T: Clone>(
        &self,
        op: &str,
        read: impl FnOnce(&mut dyn DeviceBinding) -> Result<T, CamError>,
        store: impl FnOnce(&mut CameraProperties, T),
    ) -> Result<T, CamError> {
        self.require_connected()?;
        self.shared.gate.with_device(op, |dev| {
            let value = read(dev)?;
            store(&mut self.shared.state.lock().properties, value.clone());
            Ok(value)
        })
    }

    fn write_device(
        &self,
        op: &str,
        write: impl FnOnce(&mut dyn DeviceBinding, &CameraProperties) -> Result<(), CamError>,
        store: impl FnOnce(&mut CameraProperties),
    ) -> Result<(), CamError> {
        self.require_connected()?;
        self.shared.gate.with_device(op, |dev| {
            let cached = self.shared.state.lock().properties.clone();
            write(dev, &cached)?;
            store(&mut self.shared.state.lock().properties);
            Ok(())
        })?;
        debug!(op, "property updated");
        self.shared.emit(ChangeReason::Properties);
        Ok(())
    }

    fn read_cached<T>(&self, read: impl FnOnce(&CameraProperties) -> T) -> Result<T, CamError> {
        let st = self.shared.state.lock();
        if !st.connected {
            return Err(CamError::NotConnected);
        }
        Ok(read(&st.properties))
    }

    fn write_cached(&self, store: impl FnOnce(&mut CameraProperties)) -> Result<(), CamError> {
        {
            let mut st = self.shared.state.lock();
            if !st.connected {
                return Err(CamError::NotConnected);
            }
            store(&mut st.properties);
        }
        self.shared.emit(ChangeReason::Properties);
        Ok(())
    }

    // ── Batch ───────────────────────────────────────────────────────────

    /// Re-read every device-backed property and return the refreshed cache.
    pub fn refresh_properties(&self) -> Result<CameraProperties, CamError> {
        self.require_connected()?;
        self.shared.gate.with_device("refresh_properties", |dev| {
            let mut props = self.shared.state.lock().properties.clone();
            read_device_properties(dev, &mut props)?;
            self.shared.state.lock().properties = props.clone();
            Ok(props)
        })
    }

    /// Restore factory defaults, resynchronise the whole cache from the
    /// device, reset the RGB levels to 255 and emit a single
    /// [`ChangeReason::Properties`] event.
    #[instrument(skip(self))]
    pub fn reset_factory_defaults(&self) -> Result<(), CamError> {
        self.require_connected()?;
        self.shared.gate.with_device("reset_factory_defaults", |dev| {
            dev.reset_factory_defaults()?;
            let mut props = self.shared.state.lock().properties.clone();
            read_device_properties(dev, &mut props)?;
            props.levels = ChannelLevels::FULL;
            self.shared.state.lock().properties = props;
            Ok(())
        })?;
        self.shared.emit(ChangeReason::Properties);
        Ok(())
    }

    // ── Exposure ────────────────────────────────────────────────────────

    /// Exposure time in microseconds.
    pub fn exposure_time_us(&self) -> Result<u32, CamError> {
        self.read_device("exposure_time_us", |d| d.exposure_time_us(), |p, v| {
            p.exposure_time_us = v
        })
    }

    /// # Errors
    ///
    /// [`CamError::OutOfRange`] outside the device's exposure limits.
    #[instrument(skip(self))]
    pub fn set_exposure_time_us(&self, exposure_us: u32) -> Result<(), CamError> {
        self.write_device(
            "set_exposure_time_us",
            |d, _| {
                let limits = d.exposure_limits()?;
                ensure_within(
                    "exposure_time_us",
                    exposure_us as f64,
                    Limits::new(limits.min as f64, limits.max as f64),
                )?;
                d.set_exposure_time_us(exposure_us)
            },
            |p| p.exposure_time_us = exposure_us,
        )
    }

    pub fn exposure_limits(&self) -> Result<Limits<u32>, CamError> {
        self.require_connected()?;
        self.shared
            .gate
            .with_device("exposure_limits", |d| d.exposure_limits())
    }

    pub fn exposure_auto(&self) -> Result<AutoMode, CamError> {
        self.read_device("exposure_auto", |d| d.exposure_auto(), |p, v| {
            p.exposure_auto = v
        })
    }

    #[instrument(skip(self))]
    pub fn set_exposure_auto(&self, mode: AutoMode) -> Result<(), CamError> {
        self.write_device(
            "set_exposure_auto",
            |d, _| d.set_exposure_auto(mode),
            |p| p.exposure_auto = mode,
        )
    }

    // ── Gain ────────────────────────────────────────────────────────────

    /// Gain in dB.
    pub fn gain_db(&self) -> Result<f64, CamError> {
        self.read_device("gain_db", |d| d.gain_db(), |p, v| p.gain_db = v)
    }

    /// # Errors
    ///
    /// [`CamError::OutOfRange`] outside the device's gain limits.
    #[instrument(skip(self))]
    pub fn set_gain_db(&self, gain_db: f64) -> Result<(), CamError> {
        self.write_device(
            "set_gain_db",
            |d, _| {
                ensure_within("gain_db", gain_db, d.gain_limits()?)?;
                d.set_gain_db(gain_db)
            },
            |p| p.gain_db = gain_db,
        )
    }

    pub fn gain_limits(&self) -> Result<Limits<f64>, CamError> {
        self.require_connected()?;
        self.shared.gate.with_device("gain_limits", |d| d.gain_limits())
    }

    pub fn gain_auto(&self) -> Result<AutoMode, CamError> {
        self.read_device("gain_auto", |d| d.gain_auto(), |p, v| p.gain_auto = v)
    }

    /// Switching to [`AutoMode::Off`] re-applies the cached manual gain, so
    /// the sensor returns to the value the session last knew about.
    #[instrument(skip(self))]
    pub fn set_gain_auto(&self, mode: AutoMode) -> Result<(), CamError> {
        self.write_device(
            "set_gain_auto",
            |d, cached| {
                d.set_gain_auto(mode)?;
                if mode == AutoMode::Off {
                    d.set_gain_db(cached.gain_db)?;
                }
                Ok(())
            },
            |p| p.gain_auto = mode,
        )
    }

    // ── Image quality ───────────────────────────────────────────────────

    pub fn sharpness(&self) -> Result<f64, CamError> {
        self.read_device("sharpness", |d| d.sharpness(), |p, v| p.sharpness = v)
    }

    #[instrument(skip(self))]
    pub fn set_sharpness(&self, level: f64) -> Result<(), CamError> {
        self.write_device(
            "set_sharpness",
            |d, _| {
                ensure_within("sharpness", level, d.sharpness_limits()?)?;
                d.set_sharpness(level)
            },
            |p| p.sharpness = level,
        )
    }

    pub fn gamma(&self) -> Result<f64, CamError> {
        self.read_device("gamma", |d| d.gamma(), |p, v| p.gamma = v)
    }

    #[instrument(skip(self))]
    pub fn set_gamma(&self, gamma: f64) -> Result<(), CamError> {
        self.write_device(
            "set_gamma",
            |d, _| {
                ensure_within("gamma", gamma, d.gamma_limits()?)?;
                d.set_gamma(gamma)
            },
            |p| p.gamma = gamma,
        )
    }

    // ── Colour ──────────────────────────────────────────────────────────

    pub fn light_source(&self) -> Result<LightSourcePreset, CamError> {
        self.read_device("light_source", |d| d.light_source(), |p, v| {
            p.light_source = v
        })
    }

    #[instrument(skip(self))]
    pub fn set_light_source(&self, preset: LightSourcePreset) -> Result<(), CamError> {
        self.write_device(
            "set_light_source",
            |d, _| d.set_light_source(preset),
            |p| p.light_source = preset,
        )
    }

    pub fn white_balance_auto(&self) -> Result<AutoMode, CamError> {
        self.read_device(
            "white_balance_auto",
            |d| d.white_balance_auto(),
            |p, v| p.white_balance_auto = v,
        )
    }

    #[instrument(skip(self))]
    pub fn set_white_balance_auto(&self, mode: AutoMode) -> Result<(), CamError> {
        self.write_device(
            "set_white_balance_auto",
            |d, _| d.set_white_balance_auto(mode),
            |p| p.white_balance_auto = mode,
        )
    }

    // ── Geometry ────────────────────────────────────────────────────────

    pub fn frame_width(&self) -> Result<u32, CamError> {
        self.read_device("frame_width", |d| d.frame_width(), |p, v| p.width = v)
    }

    pub fn frame_height(&self) -> Result<u32, CamError> {
        self.read_device("frame_height", |d| d.frame_height(), |p, v| p.height = v)
    }

    /// Subsequent frames are decoded with the new width.
    #[instrument(skip(self))]
    pub fn set_frame_width(&self, width: u32) -> Result<(), CamError> {
        self.write_device(
            "set_frame_width",
            |d, _| d.set_frame_width(width),
            |p| p.width = width,
        )
    }

    #[instrument(skip(self))]
    pub fn set_frame_height(&self, height: u32) -> Result<(), CamError> {
        self.write_device(
            "set_frame_height",
            |d, _| d.set_frame_height(height),
            |p| p.height = height,
        )
    }

    // ── Software-only ───────────────────────────────────────────────────

    pub fn levels(&self) -> Result<ChannelLevels, CamError> {
        self.read_cached(|p| p.levels)
    }

    pub fn set_levels(&self, levels: ChannelLevels) -> Result<(), CamError> {
        self.write_cached(|p| p.levels = levels)
    }

    /// Advisory flag for frame consumers; frames are not inverted here.
    pub fn negative(&self) -> Result<bool, CamError> {
        self.read_cached(|p| p.negative)
    }

    pub fn set_negative(&self, negative: bool) -> Result<(), CamError> {
        self.write_cached(|p| p.negative = negative)
    }

    pub fn color_saturation(&self) -> Result<u8, CamError> {
        self.read_cached(|p| p.color_saturation)
    }

    pub fn set_color_saturation(&self, saturation: u8) -> Result<(), CamError> {
        self.write_cached(|p| p.color_saturation = saturation)
    }

    pub fn continuous_awb(&self) -> Result<bool, CamError> {
        self.read_cached(|p| p.continuous_awb)
    }

    pub fn set_continuous_awb(&self, enabled: bool) -> Result<(), CamError> {
        self.write_cached(|p| p.continuous_awb = enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{record, reasons, sim_session, wait_until};
    use camctl_hal::SimCamera;
    use camctl_hal::sim::{SIM_EXPOSURE_LIMITS, SIM_GAIN_LIMITS};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    fn connected() -> (CameraSession, camctl_hal::SimProbe) {
        let (session, probe) = sim_session(SimCamera::new("sim"));
        session.connect().unwrap();
        (session, probe)
    }

    #[test]
    fn everything_fails_while_disconnected() {
        let (session, _probe) = sim_session(SimCamera::new("sim"));
        assert_eq!(session.gamma().unwrap_err(), CamError::NotConnected);
        assert_eq!(session.set_gamma(1.2).unwrap_err(), CamError::NotConnected);
        assert_eq!(session.levels().unwrap_err(), CamError::NotConnected);
        assert_eq!(
            session.set_negative(true).unwrap_err(),
            CamError::NotConnected
        );
        assert_eq!(
            session.reset_factory_defaults().unwrap_err(),
            CamError::NotConnected
        );
    }

    #[test]
    fn getter_refreshes_cache_without_emitting() {
        let (session, probe) = connected();
        let log = record(&session);
        probe.update_settings(|s| s.gamma = 2.2);

        assert_eq!(session.snapshot().properties.gamma, 1.0);
        assert_eq!(session.gamma().unwrap(), 2.2);
        assert_eq!(session.snapshot().properties.gamma, 2.2);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn setter_writes_device_caches_and_emits_once() {
        let (session, probe) = connected();
        let log = record(&session);

        session.set_exposure_time_us(25_000).unwrap();
        assert_eq!(probe.settings().exposure_time_us, 25_000);
        assert_eq!(session.snapshot().properties.exposure_time_us, 25_000);
        assert_eq!(reasons(&log, ChangeReason::Properties), 1);

        session.set_light_source(LightSourcePreset::Tungsten2800K).unwrap();
        session.set_white_balance_auto(AutoMode::Continuous).unwrap();
        session.set_exposure_auto(AutoMode::Once).unwrap();
        session.set_sharpness(0.5).unwrap();
        assert_eq!(reasons(&log, ChangeReason::Properties), 5);

        let settings = probe.settings();
        assert_eq!(settings.light_source, LightSourcePreset::Tungsten2800K);
        assert_eq!(settings.white_balance_auto, AutoMode::Continuous);
        assert_eq!(settings.exposure_auto, AutoMode::Once);
        assert_eq!(settings.sharpness, 0.5);
    }

    #[test]
    fn out_of_range_set_leaves_cache_and_device_untouched() {
        let (session, probe) = connected();
        let log = record(&session);
        let before = session.snapshot().properties;

        let err = session
            .set_exposure_time_us(SIM_EXPOSURE_LIMITS.max + 1)
            .unwrap_err();
        assert!(matches!(err, CamError::OutOfRange { .. }));

        let err = session.set_gain_db(SIM_GAIN_LIMITS.max + 0.5).unwrap_err();
        match err {
            CamError::OutOfRange { property, max, .. } => {
                assert_eq!(property, "gain_db");
                assert_eq!(max, SIM_GAIN_LIMITS.max);
            }
            other => panic!("expected OutOfRange, got {other:?}"),
        }
        assert!(session.set_gamma(f64::NAN).is_err());

        assert_eq!(session.snapshot().properties, before);
        assert_eq!(probe.op_count("set_exposure_time_us"), 0);
        assert_eq!(probe.op_count("set_gain_db"), 0);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn device_rejection_is_reported_and_session_stays_usable() {
        let (session, probe) = connected();
        probe.reject_property("light_source");
        let err = session
            .set_light_source(LightSourcePreset::Daylight6500K)
            .unwrap_err();
        assert!(err.is_property_error());
        assert_eq!(
            session.snapshot().properties.light_source,
            LightSourcePreset::Daylight5000K
        );

        session.set_gamma(0.8).unwrap();
        assert_eq!(session.gamma().unwrap(), 0.8);
    }

    #[test]
    fn gain_auto_off_reapplies_cached_gain() {
        let (session, probe) = connected();
        session.set_gain_db(6.0).unwrap();
        session.set_gain_auto(AutoMode::Continuous).unwrap();

        // Auto gain drifts the device value.
        probe.update_settings(|s| s.gain_db = 17.0);
        session.set_gain_auto(AutoMode::Off).unwrap();

        assert_eq!(probe.settings().gain_auto, AutoMode::Off);
        assert_eq!(probe.settings().gain_db, 6.0);
        assert_eq!(probe.op_count("set_gain_db"), 2);
    }

    #[test]
    fn factory_reset_resyncs_and_emits_one_event() {
        let (session, probe) = connected();
        session.set_gamma(2.0).unwrap();
        session.set_exposure_time_us(50_000).unwrap();
        session
            .set_levels(ChannelLevels {
                red: 10,
                green: 20,
                blue: 30,
            })
            .unwrap();
        let log = record(&session);

        session.reset_factory_defaults().unwrap();

        assert_eq!(reasons(&log, ChangeReason::Properties), 1);
        assert_eq!(log.lock().len(), 1);
        let props = session.snapshot().properties;
        let defaults = camctl_hal::sim::SimSettings::default();
        assert_eq!(props.gamma, defaults.gamma);
        assert_eq!(props.exposure_time_us, defaults.exposure_time_us);
        assert_eq!(props.levels, ChannelLevels::FULL);
        assert_eq!(probe.settings(), defaults);
    }

    #[test]
    fn software_fields_never_touch_the_device() {
        let (session, probe) = connected();
        let log = record(&session);
        let ops_before = probe.ops().len();

        session.set_negative(true).unwrap();
        session.set_color_saturation(42).unwrap();
        session.set_continuous_awb(true).unwrap();
        session.set_levels(ChannelLevels { red: 1, green: 2, blue: 3 }).unwrap();

        assert!(session.negative().unwrap());
        assert_eq!(session.color_saturation().unwrap(), 42);
        assert!(session.continuous_awb().unwrap());
        assert_eq!(session.levels().unwrap().green, 2);
        assert_eq!(probe.ops().len(), ops_before);
        assert_eq!(reasons(&log, ChangeReason::Properties), 4);
    }

    #[test]
    fn resize_changes_decoded_frame_geometry() {
        let (session, _probe) = connected();
        session.set_frame_width(5).unwrap();
        session.set_frame_height(2).unwrap();
        assert_eq!(session.frame_width().unwrap(), 5);
        assert_eq!(session.frame_height().unwrap(), 2);

        session.start_acquisition().unwrap();
        assert!(wait_until(|| session
            .snapshot_last_frame()
            .is_some_and(|f| f.width == 5 && f.height == 2)));
        session.stop_acquisition().unwrap();
    }

    #[test]
    fn setter_mid_stream_keeps_acquiring_and_frames_continue() {
        let cam = SimCamera::new("sim").with_grab_delay(Duration::from_millis(2));
        let (session, probe) = sim_session(cam);
        session.connect().unwrap();
        let log = record(&session);
        session.start_acquisition().unwrap();
        assert!(wait_until(|| session.stats().frames_captured >= 3));

        session.set_gamma(1.8).unwrap();
        assert!(session.is_acquiring());
        assert_eq!(reasons(&log, ChangeReason::Properties), 1);

        let after = session.stats().frames_captured;
        assert!(wait_until(|| session.stats().frames_captured > after + 2));
        session.stop_acquisition().unwrap();
        assert_eq!(probe.overlapping_ops(), 0);
    }

    #[test]
    fn concurrent_setters_and_acquisition_never_overlap() {
        let cam = SimCamera::new("sim").with_grab_delay(Duration::from_millis(1));
        let (session, probe) = sim_session(cam);
        let session = Arc::new(session);
        session.connect().unwrap();
        session.start_acquisition().unwrap();

        let workers: Vec<_> = (0..4)
            .map(|t| {
                let s = Arc::clone(&session);
                std::thread::spawn(move || {
                    for i in 0..20u32 {
                        s.set_exposure_time_us(1_000 + t * 100 + i).unwrap();
                        s.gamma().unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert!(session.is_acquiring());
        session.disconnect().unwrap();
        assert_eq!(probe.overlapping_ops(), 0);
        assert_eq!(probe.grabs_after_close(), 0);
    }

    #[test]
    fn busy_timeout_is_typed_and_acquisition_resumes() {
        let (session, probe) = connected();
        session.start_acquisition().unwrap();
        assert!(wait_until(|| session.stats().frames_captured >= 1));

        probe.set_stuck_busy(true);
        let err = session.gamma().unwrap_err();
        assert!(matches!(err, CamError::BusyTimeout { .. }));
        assert!(session.is_acquiring());
        assert_eq!(session.stats().busy_timeouts, 1);

        probe.set_stuck_busy(false);
        let after = session.stats().frames_captured;
        assert!(wait_until(|| session.stats().frames_captured > after));
        session.stop_acquisition().unwrap();
    }

    #[test]
    fn momentary_control_waits_out_a_busy_device() {
        let (session, probe) = connected();
        probe.report_busy_for(5);
        assert_eq!(session.exposure_time_us().unwrap(), 10_000);
        assert_eq!(probe.busy_polls_remaining(), 0);
    }

    #[test]
    fn subscriber_may_call_setters_from_the_worker() {
        let (session, probe) = connected();
        let session = Arc::new(session);
        let done = Arc::new(AtomicU64::new(0));

        let weak = Arc::downgrade(&session);
        let counter = Arc::clone(&done);
        session.subscribe(ChangeReason::NewFrame, move |_| {
            if counter.load(Ordering::SeqCst) == 0 {
                if let Some(s) = weak.upgrade() {
                    s.set_sharpness(0.25).unwrap();
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        session.start_acquisition().unwrap();
        assert!(wait_until(|| done.load(Ordering::SeqCst) == 1));
        session.stop_acquisition().unwrap();
        assert_eq!(probe.settings().sharpness, 0.25);
    }

    #[test]
    fn limits_are_exposed() {
        let (session, _probe) = connected();
        assert_eq!(session.exposure_limits().unwrap(), SIM_EXPOSURE_LIMITS);
        assert_eq!(session.gain_limits().unwrap(), SIM_GAIN_LIMITS);
        let props = session.refresh_properties().unwrap();
        assert_eq!(props.width, 8);
    }
}
