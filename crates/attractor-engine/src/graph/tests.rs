use std::cell::{Cell, RefCell};
use std::rc::Rc;

use proptest::prelude::*;
use wgpu::BufferUsages;

use super::mock::{Command, MockBackend, MockViews, Writes};
use super::*;

const STORAGE: BufferUsages = BufferUsages::STORAGE
    .union(BufferUsages::COPY_SRC)
    .union(BufferUsages::COPY_DST);

const STAGING: &str = "attractor staging frameinfo";

fn graph() -> FrameGraph<MockBackend> {
    FrameGraph::new(MockBackend::new())
}

fn frame(g: &mut FrameGraph<MockBackend>) -> FrameReport {
    g.execute(&mut MockViews::default())
}

fn handle_id(g: &FrameGraph<MockBackend>, name: &str) -> u32 {
    let key = g.buffer_key(name).expect("name was interned");
    g.buffers.get(key).expect("buffer is live").handle.id
}

fn first_word(bytes: &[u8]) -> u32 {
    bytemuck::pod_read_unaligned(&bytes[..4])
}

fn outcome(report: &FrameReport, id: PassId) -> &PassOutcome {
    &report.outcomes[id.index()].1
}

#[test]
fn passes_encode_in_insertion_order_into_one_submission() {
    let mut g = graph();
    g.create_buffer("data", 64, STORAGE);
    g.create_buffer("indirect", 12, STORAGE | BufferUsages::INDIRECT);
    g.create_buffer("timestamp", 32, BufferUsages::QUERY_RESOLVE | BufferUsages::COPY_SRC);
    g.create_query_set("tsquery", 4).unwrap();

    g.add_clear("data");
    g.add_compute_pass(&(), "deJong", 16, &[("data", 4)], Some(Measure::span("tsquery", 0, 1)));
    g.add_resolve_query("tsquery", "timestamp");
    g.add_compute_pass_indirect(&(), "pass1t", "indirect", &[("data", 4), ("indirect", 3)], None);
    let render = g.add_render_pass(&(), "vs", "fs", 3, &[("data", 4)], None);
    g.add_buffer_download("timestamp", 2, |_| {});

    assert_eq!(g.pass_count(), 6);
    assert_eq!(g.pass_kind(render), Some(PassKind::Render));

    for _ in 0..2 {
        let report = frame(&mut g);
        assert_eq!(report.encoded(), 6);
        assert_eq!(report.copies, 1);
    }

    let submissions = g.backend().submissions();
    assert_eq!(submissions.len(), 2);
    for batch in &submissions {
        let labels: Vec<&str> = batch.iter().map(Command::label).collect();
        assert_eq!(labels, ["clear", "deJong", "resolve", "pass1t", "vs/fs", "copy"]);
    }
}

#[test]
fn replacing_a_buffer_rebinds_dependents_to_the_new_handle() {
    let mut g = graph();
    let key = g.create_buffer("data", 64, STORAGE);
    g.add_compute_pass(&(), "deJong", 1, &[("data", 4)], None);
    frame(&mut g);

    let old = handle_id(&g, "data");
    g.create_buffer("data", 128, STORAGE);
    let new = handle_id(&g, "data");

    assert_ne!(old, new);
    assert!(g.backend().is_destroyed(old));
    assert_eq!(g.buffer_size(key), Some(128));
    assert_eq!(g.backend().waits(), 0);

    let report = frame(&mut g);
    assert_eq!(report.encoded(), 1);
    match &g.backend().last_submission()[0] {
        Command::Compute { bound, .. } => assert_eq!(bound, &vec![(4, new)]),
        other => panic!("expected a compute command, got {other:?}"),
    }
}

#[test]
fn bind_group_is_built_once_until_a_binding_changes() {
    let mut g = graph();
    g.create_buffer("data", 64, STORAGE);
    g.create_buffer("frameinfo", 52, STORAGE);
    g.add_compute_pass(&(), "deJong", 1, &[("data", 4), ("frameinfo", 2)], None);
    g.add_compute_pass(&(), "pass1t", 1, &[("frameinfo", 2)], None);
    assert_eq!(g.backend().bind_groups_built(), 2);

    for _ in 0..3 {
        frame(&mut g);
    }
    assert_eq!(g.backend().bind_groups_built(), 2);

    // Only the pass binding "data" is rebuilt.
    g.create_buffer("data", 256, STORAGE);
    assert_eq!(g.backend().bind_groups_built(), 3);
}

#[test]
fn pass_stays_inert_until_every_bound_buffer_exists() {
    let mut g = graph();
    let id = g.add_compute_pass(&(), "step", 1, &[("u", 0), ("d", 1)], None);
    g.create_buffer("u", 16, BufferUsages::UNIFORM | BufferUsages::COPY_DST);

    let report = frame(&mut g);
    assert_eq!(
        outcome(&report, id),
        &PassOutcome::Inert(GraphError::UnresolvedDependency {
            kind: DependencyKind::Buffer,
            name: "d".to_string(),
        })
    );
    let inert: Vec<_> = report.inert().collect();
    assert_eq!(inert.len(), 1);
    assert_eq!(inert[0].0, id);
    assert!(g.backend().last_submission().is_empty());

    g.create_buffer("d", 64, STORAGE);
    let report = frame(&mut g);
    assert_eq!(outcome(&report, id), &PassOutcome::Encoded);
    assert_eq!(g.backend().last_submission().len(), 1);
}

#[test]
fn render_pass_without_a_view_is_inert() {
    let mut g = graph();
    g.create_buffer("data", 64, STORAGE);
    let id = g.add_render_pass(&(), "vs", "fs", 3, &[("data", 5)], None);

    let report = g.execute(&mut Headless);
    assert_eq!(
        outcome(&report, id),
        &PassOutcome::Inert(GraphError::UnresolvedDependency {
            kind: DependencyKind::SurfaceView,
            name: "surface".to_string(),
        })
    );
}

#[test]
fn render_pass_acquires_a_fresh_view_every_frame() {
    let mut g = graph();
    g.create_buffer("data", 64, STORAGE);
    g.add_render_pass(&(), "vs", "fs", 3, &[("data", 5)], None);

    let mut views = MockViews::default();
    g.execute(&mut views);
    g.execute(&mut views);
    assert_eq!(views.acquired, 2);

    let drawn: Vec<u32> = g
        .backend()
        .submissions()
        .iter()
        .flatten()
        .filter_map(|c| match c {
            Command::Render { view, vertex_count: 3, .. } => Some(*view),
            _ => None,
        })
        .collect();
    assert_eq!(drawn, [1, 2]);
}

#[test]
fn download_skips_copies_at_the_in_flight_bound() {
    let mut g = graph();
    g.create_buffer("frameinfo", 52, STORAGE);
    let delivered = Rc::new(Cell::new(0usize));
    let d = delivered.clone();
    let id = g.add_buffer_download("frameinfo", 2, move |_| d.set(d.get() + 1));

    assert_eq!(frame(&mut g).copies, 1);
    assert_eq!(frame(&mut g).copies, 1);

    let third = frame(&mut g);
    assert_eq!(third.copies, 0);
    assert_eq!(outcome(&third, id), &PassOutcome::Throttled);
    assert!(
        !g.backend()
            .last_submission()
            .iter()
            .any(|c| matches!(c, Command::Copy { .. }))
    );
    assert_eq!(g.in_flight(id), Some(2));

    // Completion is only applied by the frame loop.
    g.backend().complete_map(0, true);
    assert_eq!(delivered.get(), 0);

    let fourth = frame(&mut g);
    assert_eq!(delivered.get(), 1);
    assert_eq!(fourth.copies, 1);
    assert_eq!(g.in_flight(id), Some(2));
    assert_eq!(g.backend().buffers_labelled(STAGING).len(), 2);
}

#[test]
fn staging_buffers_are_recycled() {
    let mut g = graph();
    g.create_buffer("frameinfo", 52, STORAGE);
    g.add_buffer_download("frameinfo", 1, |_| {});

    for _ in 0..5 {
        frame(&mut g);
        g.backend().complete_all_maps();
    }
    g.poll();

    assert_eq!(g.backend().buffers_labelled(STAGING).len(), 1);
    assert_eq!(
        g.download_status(),
        DownloadStatus {
            pending_in_pool: 1,
            in_flight: 0,
        }
    );
}

#[test]
fn deliveries_follow_submission_order() {
    let mut g = graph();
    let key = g.create_buffer("frameinfo", 8, STORAGE);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    g.add_buffer_download("frameinfo", 3, move |bytes| s.borrow_mut().push(first_word(bytes)));

    for i in 0..3u32 {
        g.update_buffer_with(key, &[i, 0u32]).unwrap();
        frame(&mut g);
    }
    assert_eq!(g.backend().pending_maps(), 3);

    g.backend().complete_map(2, true);
    g.poll();
    assert!(seen.borrow().is_empty());

    g.backend().complete_map(1, true);
    g.poll();
    assert!(seen.borrow().is_empty());

    g.backend().complete_map(0, true);
    g.poll();
    assert_eq!(*seen.borrow(), [0, 1, 2]);
    assert_eq!(
        g.download_status(),
        DownloadStatus {
            pending_in_pool: 3,
            in_flight: 0,
        }
    );
}

#[test]
fn failed_map_drops_the_result_and_recycles_the_buffer() {
    let mut g = graph();
    g.create_buffer("frameinfo", 52, STORAGE);
    let delivered = Rc::new(Cell::new(0usize));
    let d = delivered.clone();
    let id = g.add_buffer_download("frameinfo", 1, move |_| d.set(d.get() + 1));

    frame(&mut g);
    g.backend().complete_map(0, false);
    g.poll();

    assert_eq!(delivered.get(), 0);
    assert_eq!(g.in_flight(id), Some(0));
    assert_eq!(g.download_status().pending_in_pool, 1);

    frame(&mut g);
    assert_eq!(g.backend().buffers_labelled(STAGING).len(), 1);
}

#[test]
fn replacing_a_downloaded_buffer_drains_pending_readbacks_first() {
    let mut g = graph();
    let key = g.create_buffer("frameinfo", 8, STORAGE);
    g.update_buffer_with(key, &[7u32, 0]).unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = seen.clone();
    let id = g.add_buffer_download("frameinfo", 2, move |bytes| s.borrow_mut().push(first_word(bytes)));

    frame(&mut g);
    frame(&mut g);
    assert_eq!(g.in_flight(id), Some(2));

    g.create_buffer("frameinfo", 16, STORAGE);
    assert_eq!(g.backend().waits(), 1);
    assert_eq!(*seen.borrow(), [7, 7]);
    assert_eq!(g.in_flight(id), Some(0));

    // Both idle staging buffers are too small now; one is swapped for a larger one.
    frame(&mut g);
    assert_eq!(g.backend().buffers_labelled(STAGING).len(), 3);
    assert_eq!(g.backend().live_buffers_labelled(STAGING), 2);
    let copied: Vec<u64> = g
        .backend()
        .last_submission()
        .iter()
        .filter_map(|c| match c {
            Command::Copy { size, .. } => Some(*size),
            _ => None,
        })
        .collect();
    assert_eq!(copied, [16]);
}

#[test]
fn larger_staging_buffer_is_reused_for_a_smaller_source() {
    let mut g = graph();
    g.create_buffer("frameinfo", 64, STORAGE);
    let lengths = Rc::new(RefCell::new(Vec::new()));
    let l = lengths.clone();
    g.add_buffer_download("frameinfo", 1, move |bytes| l.borrow_mut().push(bytes.len()));

    frame(&mut g);
    g.backend().complete_all_maps();
    g.poll();
    let staging = g.backend().buffers_labelled(STAGING);
    assert_eq!(staging.len(), 1);

    g.create_buffer("frameinfo", 16, STORAGE);
    let src = handle_id(&g, "frameinfo");
    frame(&mut g);
    assert_eq!(
        g.backend().last_submission(),
        [Command::Copy {
            src,
            dst: staging[0],
            size: 16,
        }]
    );

    g.backend().complete_all_maps();
    g.poll();
    assert_eq!(*lengths.borrow(), [64, 16]);
}

#[test]
fn download_of_a_missing_buffer_waits_for_it() {
    let mut g = graph();
    let id = g.add_buffer_download("frameinfo", 2, |_| {});

    let report = frame(&mut g);
    assert_eq!(
        outcome(&report, id),
        &PassOutcome::Inert(GraphError::CapacityExceeded {
            name: "frameinfo".to_string(),
            needed: 4,
            available: 0,
        })
    );
    assert_eq!(g.backend().pending_maps(), 0);

    g.create_buffer("frameinfo", 52, STORAGE);
    assert_eq!(frame(&mut g).copies, 1);
}

#[test]
fn zero_in_flight_bound_is_treated_as_one() {
    let mut g = graph();
    g.create_buffer("frameinfo", 52, STORAGE);
    let id = g.add_buffer_download("frameinfo", 0, |_| {});

    assert_eq!(frame(&mut g).copies, 1);
    let report = frame(&mut g);
    assert_eq!(outcome(&report, id), &PassOutcome::Throttled);
}

#[test]
fn missing_usage_flags_make_passes_inert() {
    let mut g = graph();
    g.create_buffer("data", 64, BufferUsages::STORAGE);
    let clear = g.add_clear("data");
    let download = g.add_buffer_download("data", 1, |_| {});

    let report = frame(&mut g);
    assert_eq!(
        outcome(&report, clear),
        &PassOutcome::Inert(GraphError::UsageMismatch {
            name: "data".to_string(),
            required: BufferUsages::COPY_DST,
        })
    );
    assert_eq!(
        outcome(&report, download),
        &PassOutcome::Inert(GraphError::UsageMismatch {
            name: "data".to_string(),
            required: BufferUsages::COPY_SRC,
        })
    );
    assert!(g.backend().last_submission().is_empty());
    assert_eq!(g.backend().pending_maps(), 0);
}

#[test]
fn unaligned_lengths_make_passes_inert() {
    let mut g = graph();
    g.create_buffer("odd", 6, STORAGE);
    let clear = g.add_clear("odd");
    let download = g.add_buffer_download("odd", 1, |_| {});

    let misaligned = PassOutcome::Inert(GraphError::Misaligned {
        name: "odd".to_string(),
        size: 6,
    });
    let report = frame(&mut g);
    assert_eq!(outcome(&report, clear), &misaligned);
    assert_eq!(outcome(&report, download), &misaligned);
    assert!(g.backend().last_submission().is_empty());
    assert_eq!(g.backend().pending_maps(), 0);

    g.create_buffer("odd", 8, STORAGE);
    let report = frame(&mut g);
    assert_eq!(report.encoded(), 2);
    assert_eq!(report.copies, 1);
}

#[test]
fn indirect_dispatch_validates_its_argument_buffer() {
    let mut g = graph();
    g.create_buffer("data", 64, STORAGE);
    let id = g.add_compute_pass_indirect(&(), "pass1t", "indirect", &[("data", 4)], None);

    let capacity = |available| {
        PassOutcome::Inert(GraphError::CapacityExceeded {
            name: "indirect".to_string(),
            needed: 12,
            available,
        })
    };

    assert_eq!(outcome(&frame(&mut g), id), &capacity(0));

    g.create_buffer("indirect", 8, STORAGE | BufferUsages::INDIRECT);
    assert_eq!(outcome(&frame(&mut g), id), &capacity(8));

    g.create_buffer("indirect", 12, STORAGE);
    assert_eq!(
        outcome(&frame(&mut g), id),
        &PassOutcome::Inert(GraphError::UsageMismatch {
            name: "indirect".to_string(),
            required: BufferUsages::INDIRECT,
        })
    );

    g.create_buffer("indirect", 12, STORAGE | BufferUsages::INDIRECT);
    assert_eq!(outcome(&frame(&mut g), id), &PassOutcome::Encoded);
    let indirect = handle_id(&g, "indirect");
    assert!(matches!(
        &g.backend().last_submission()[0],
        Command::Compute { indirect: Some(i), workgroups: None, .. } if *i == indirect
    ));
}

#[test]
fn resolve_needs_a_query_set_and_room_for_every_slot() {
    let mut g = graph();
    let id = g.add_resolve_query("tsquery", "timestamp");

    assert_eq!(
        outcome(&frame(&mut g), id),
        &PassOutcome::Inert(GraphError::UnresolvedDependency {
            kind: DependencyKind::QuerySet,
            name: "tsquery".to_string(),
        })
    );

    let query = g.create_query_set("tsquery", 4).unwrap();
    assert_eq!(g.query_key("tsquery"), Some(query));
    assert_eq!(g.query_capacity(query), Some(4));

    let usage = BufferUsages::QUERY_RESOLVE | BufferUsages::COPY_SRC;
    g.create_buffer("timestamp", 16, usage);
    assert_eq!(
        outcome(&frame(&mut g), id),
        &PassOutcome::Inert(GraphError::CapacityExceeded {
            name: "timestamp".to_string(),
            needed: 32,
            available: 16,
        })
    );

    g.create_buffer("timestamp", 32, usage);
    assert_eq!(outcome(&frame(&mut g), id), &PassOutcome::Encoded);
    let target = handle_id(&g, "timestamp");
    assert!(matches!(
        g.backend().last_submission()[0],
        Command::Resolve { count: 4, target: t, .. } if t == target
    ));
}

#[test]
fn invalid_measure_is_dropped_but_the_pass_still_runs() {
    let mut g = graph();
    g.create_buffer("data", 64, STORAGE);
    g.add_compute_pass(&(), "deJong", 16, &[("data", 4)], Some(Measure::span("tsquery", 0, 1)));
    g.add_compute_pass(&(), "late", 1, &[("data", 4)], Some(Measure::span("tsquery", 4, 5)));
    g.add_compute_pass(
        &(),
        "empty",
        1,
        &[("data", 4)],
        Some(Measure {
            query: "tsquery".to_string(),
            begin: None,
            end: None,
        }),
    );
    g.add_compute_pass(&(), "same", 1, &[("data", 4)], Some(Measure::span("tsquery", 1, 1)));

    let writes = |g: &FrameGraph<MockBackend>| -> Vec<Writes> {
        g.backend()
            .last_submission()
            .into_iter()
            .filter_map(|c| match c {
                Command::Compute { timestamps, .. } => Some(timestamps),
                _ => None,
            })
            .collect()
    };

    assert_eq!(frame(&mut g).encoded(), 4);
    assert!(writes(&g).iter().all(Option::is_none));

    g.create_query_set("tsquery", 4).unwrap();
    assert_eq!(frame(&mut g).encoded(), 4);
    let w = writes(&g);
    assert!(matches!(w[0], Some((_, Some(0), Some(1)))));
    assert_eq!(w[1], None);
    assert_eq!(w[2], None);
    assert_eq!(w[3], None);
}

#[test]
fn query_set_without_timestamp_support_is_fatal() {
    let mut g = FrameGraph::new(MockBackend::without_timestamps());
    let err = g.create_query_set("tsquery", 4).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(g.query_key("tsquery").and_then(|k| g.query_capacity(k)), None);
}

#[test]
fn update_buffer_checks_presence_usage_and_size() {
    let mut g = graph();
    let u = g.buffers.intern("u");
    assert_eq!(
        g.update_buffer(u, &[0; 4]),
        Err(GraphError::missing_buffer("u"))
    );

    g.create_buffer("u", 8, BufferUsages::UNIFORM);
    assert_eq!(
        g.update_buffer(u, &[0; 4]),
        Err(GraphError::UsageMismatch {
            name: "u".to_string(),
            required: BufferUsages::COPY_DST,
        })
    );

    g.create_buffer("u", 8, BufferUsages::UNIFORM | BufferUsages::COPY_DST);
    assert_eq!(
        g.update_buffer(u, &[0; 12]),
        Err(GraphError::CapacityExceeded {
            name: "u".to_string(),
            needed: 12,
            available: 8,
        })
    );
    assert_eq!(
        g.update_buffer(u, &[1, 2, 3]),
        Err(GraphError::Misaligned {
            name: "u".to_string(),
            size: 3,
        })
    );
    assert_eq!(g.update_buffer_with(u, &[1.0f32, 2.0]), Ok(()));
}

#[test]
fn execute_polls_the_device_first() {
    let mut g = graph();
    frame(&mut g);
    g.poll();
    frame(&mut g);
    assert_eq!(g.backend().polls(), 3);
    assert_eq!(g.backend().submissions().len(), 2);
}

#[derive(Debug, Clone)]
enum Step {
    Frame,
    Complete { pick: usize, ok: bool },
    Resize(u64),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Frame),
        2 => (any::<usize>(), any::<bool>()).prop_map(|(pick, ok)| Step::Complete { pick, ok }),
        1 => (1u64..16).prop_map(|words| Step::Resize(words * 4)),
    ]
}

proptest! {
    #[test]
    fn downloads_stay_bounded_and_ordered(
        max in 1usize..4,
        steps in prop::collection::vec(step(), 1..48),
    ) {
        let mut g = graph();
        let key = g.create_buffer("frameinfo", 8, STORAGE);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let id = g.add_buffer_download("frameinfo", max, move |bytes| s.borrow_mut().push(first_word(bytes)));

        let mut frame_no = 0u32;
        for step in steps {
            match step {
                Step::Frame => {
                    frame_no += 1;
                    g.update_buffer_with(key, &frame_no).unwrap();
                    frame(&mut g);
                }
                Step::Complete { pick, ok } => {
                    let pending = g.backend().pending_maps();
                    if pending > 0 {
                        g.backend().complete_map(pick % pending, ok);
                    }
                    g.poll();
                }
                Step::Resize(size) => {
                    g.create_buffer("frameinfo", size, STORAGE);
                }
            }
            prop_assert!(g.in_flight(id).unwrap_or(0) <= max);
            prop_assert!(g.backend().live_buffers_labelled(STAGING) <= max);
        }

        let seen = seen.borrow();
        prop_assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }
}
