use approx::assert_relative_eq;
use chrono::{DateTime, TimeZone, Utc};
use driftstack::{
    run_sweep, CombineMode, EdgeFill, ExposureSpan, Frame, FrameSet, MemorySink, Pixel, RateGrid,
    ShiftStackParams, StackMethod, SweepConfig, WcsSpec,
};
use ndarray::Array2;

fn utc(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 2, hour, 0, 0).unwrap()
}

fn frame(id: &str, start_hour: u32, level: Pixel) -> Frame {
    let shape = (24, 24);
    Frame::new(
        id,
        Array2::from_elem(shape, level),
        Array2::ones(shape),
        Array2::zeros(shape),
        ExposureSpan::new(utc(start_hour), utc(start_hour + 1)),
        WcsSpec::tangent([12.0, 12.0], [40.0, 5.0], 1.0),
    )
    .unwrap()
}

fn small_config() -> SweepConfig {
    SweepConfig {
        n_sub_stacks: 2,
        grid: RateGrid {
            rate_min: 1.0,
            rate_max: 2.0,
            rate_step: 1.0,
            angle_min: 0.0,
            angle_max: 0.0,
            angle_step: 1.0,
        },
        shift: ShiftStackParams {
            factor: 1,
            section_size: 24,
            padding: 12,
            mode: CombineMode::Mean,
            edge_fill: EdgeFill::Stale,
        },
        ..SweepConfig::default()
    }
}

fn six_frames() -> FrameSet {
    let frames: Vec<Frame> = (0..6)
        .map(|k| frame(&format!("v{:02}", k), 1 + 2 * k, 1.0 + k as Pixel))
        .collect();
    FrameSet::new(frames).unwrap()
}

#[test]
fn test_sweep_writes_group_by_hypothesis_products() {
    let _ = env_logger::builder().is_test(true).try_init();
    let set = six_frames();
    let config = small_config();
    let mut sink = MemorySink::new();
    let summary = run_sweep(&set, &config, &mut sink).unwrap();

    // 2 groups x 2 hypotheses
    assert_eq!(summary.written, 4);
    assert_eq!(summary.skipped, 0);
    assert_eq!(sink.len(), 4);

    // the reference is the temporal median of the six sorted frames
    let ids: Vec<&str> = sink.ids().collect();
    assert!(ids.contains(&"STACK-v03-00-+01.00-+00.00"));
    assert!(ids.contains(&"STACK-v03-01-+02.00-+00.00"));

    // each interleaved group holds half of the frames
    let product = sink.get("STACK-v03-00-+01.00-+00.00").unwrap();
    assert_eq!(product.provenance.n_combined, 3);
    assert_eq!(
        product.provenance.inputs,
        vec!["v00".to_string(), "v02".to_string(), "v04".to_string()]
    );
    assert!(product.variance.is_some());
}

#[test]
fn test_sweep_skips_existing_outputs() {
    let set = six_frames();
    let config = small_config();
    let mut sink = MemorySink::new();
    let first = run_sweep(&set, &config, &mut sink).unwrap();
    assert_eq!(first.written, 4);

    // a re-run finds every output present and does no work
    let second = run_sweep(&set, &config, &mut sink).unwrap();
    assert_eq!(second.written, 0);
    assert_eq!(second.skipped, 4);
    assert_eq!(sink.len(), 4);
}

#[test]
fn test_projection_sweep_has_no_variance_plane() {
    let set = six_frames();
    let config = SweepConfig {
        method: StackMethod::Project,
        ..small_config()
    };
    let mut sink = MemorySink::new();
    let summary = run_sweep(&set, &config, &mut sink).unwrap();
    assert_eq!(summary.written, 4);
    let product = sink.get("STACK-v03-00-+01.00-+00.00").unwrap();
    assert!(product.variance.is_none());
    assert_eq!(product.provenance.combine_mode, "MEAN");
}

#[test]
fn test_sweep_with_masking_still_covers_masked_pixels() {
    // one frame carries a NO_DATA pixel; with masking on, the other
    // frames of its group fill that pixel in the mean
    let mut frames: Vec<Frame> = (0..4)
        .map(|k| frame(&format!("v{:02}", k), 1 + 2 * k, 2.0))
        .collect();
    frames[0].mask[[5, 5]] = driftstack::QualityFlag::NoData.mask_value();
    let set = FrameSet::new(frames).unwrap();

    let config = SweepConfig {
        apply_mask: true,
        n_sub_stacks: 1,
        ..small_config()
    };
    let mut sink = MemorySink::new();
    run_sweep(&set, &config, &mut sink).unwrap();
    let product = sink.get("STACK-v02-00-+01.00-+00.00").unwrap();
    assert_relative_eq!(product.image[[5, 5]], 2.0, epsilon = 1e-5);
}

#[test]
fn test_invalid_grid_aborts_before_any_work() {
    let set = six_frames();
    let config = SweepConfig {
        grid: RateGrid {
            rate_min: 5.0,
            rate_max: 1.0,
            rate_step: 1.0,
            angle_min: 0.0,
            angle_max: 0.0,
            angle_step: 1.0,
        },
        ..small_config()
    };
    let mut sink = MemorySink::new();
    assert!(run_sweep(&set, &config, &mut sink).is_err());
    assert!(sink.is_empty());
}
