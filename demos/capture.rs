//! Captures the primary output for a few seconds and reports how many
//! frames changed, printing per-frame pointer state along the way.
//!
//!     cargo run --example capture

#[cfg(target_os = "windows")]
fn main() -> anyhow::Result<()> {
    use drift_capture::{CaptureOutcome, DesktopDuplicator, PlanarFrame, PointerState};

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "drift_capture=debug".into()),
        )
        .init();

    let mut duplicator = DesktopDuplicator::new(0)?;
    let (width, height) = duplicator.output_size();
    println!(
        "duplicating output 0: {width}x{height}, rotation {:?}",
        duplicator.rotation()
    );
    duplicator.negotiate_size(1280, 720)?;

    let mut pointer = PointerState::new();
    let mut frame = PlanarFrame::empty();
    let mut delivered = 0u32;
    let mut idle = 0u32;

    let start = std::time::Instant::now();
    while start.elapsed().as_secs() < 5 {
        match duplicator.capture_frame(&mut pointer, &mut frame)? {
            CaptureOutcome::Frame => {
                delivered += 1;
                if pointer.visible() {
                    let pos = pointer.position();
                    println!("frame {delivered}: pointer at ({}, {})", pos.x, pos.y);
                }
            }
            CaptureOutcome::NoFrame => idle += 1,
        }
    }

    println!("{delivered} frames delivered, {idle} idle pulls in 5s");
    Ok(())
}

#[cfg(not(target_os = "windows"))]
fn main() {
    eprintln!("desktop duplication requires Windows");
}
