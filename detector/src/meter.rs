use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

pub static METER: Meter = Meter::new();

/// Counters of the detection loop, read and reset by the meter logger.
#[derive(Default)]
pub struct Meter {
    frames: AtomicU64,
    detections: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            frames: AtomicU64::new(0),
            detections: AtomicU64::new(0),
        }
    }

    pub fn tick_frame(&self, detections: usize) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.detections
            .fetch_add(detections as u64, Ordering::Relaxed);
    }

    /// Frames and detections counted since the last call.
    pub fn get_reset(&self) -> (u64, u64) {
        (
            self.frames.swap(0, Ordering::Relaxed),
            self.detections.swap(0, Ordering::Relaxed),
        )
    }
}

pub fn spawn_meter_logger() -> JoinHandle<()> {
    tokio::spawn(async {
        let mut log_interval = interval(Duration::from_secs(2));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let (frames, detections) = METER.get_reset();
            let elapsed = start.elapsed().as_secs_f32();
            let fps = frames as f32 / elapsed;

            if frames > 0 {
                let per_frame = detections as f32 / frames as f32;
                log::info!("Detected frames per second: {fps:.2} ({per_frame:.1} boxes per frame)")
            }
        }
    })
}
