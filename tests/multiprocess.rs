// Shared-memory surface: leader/follower handoff, metadata, raw cells, wipe.
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use timering::{
    clear_memory_in, get_max_length_in, get_start_timeindex_in, Element, Error, ErrorKind,
    MultiprocessTimeSeries, Role, SeriesOptions,
};

#[derive(Clone, Copy, Debug, PartialEq)]
struct ImuFrame {
    sensor: u32,
    acceleration: [f64; 3],
}

impl Element for ImuFrame {
    const WIRE_LEN: usize = 4 + 24;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.sensor.to_le_bytes());
        self.acceleration.encode(&mut buf[4..28]);
    }

    fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < Self::WIRE_LEN {
            return Err(Error::new(ErrorKind::Corrupt).with_message("imu cell too small"));
        }
        let mut sensor = [0u8; 4];
        sensor.copy_from_slice(&buf[0..4]);
        Ok(Self {
            sensor: u32::from_le_bytes(sensor),
            acceleration: <[f64; 3]>::decode(&buf[4..28])?,
        })
    }
}

fn options_in(dir: &tempfile::TempDir) -> SeriesOptions {
    SeriesOptions::new()
        .with_dir(dir.path())
        .with_signal_monitor(false)
}

#[test]
fn leader_follower_handoff() {
    let dir = tempfile::tempdir().expect("tempdir");
    let leader =
        MultiprocessTimeSeries::<i32>::create_leader_with("feed", 100, options_in(&dir))
            .expect("leader");
    leader.append(&10).expect("append");
    leader.append(&20).expect("append");
    leader.append(&30).expect("append");

    let follower =
        MultiprocessTimeSeries::<i32>::create_follower_with("feed", options_in(&dir))
            .expect("follower");
    assert_eq!(follower.role(), Role::Follower);
    assert_eq!(leader.role(), Role::Leader);
    assert_eq!(follower.newest_timeindex(true).expect("newest"), 2);
    assert_eq!(follower.get(2).expect("get"), 30);

    // Both views observe one canonical (oldest, newest) tuple.
    assert_eq!(
        leader.oldest_timeindex(true).expect("leader oldest"),
        follower.oldest_timeindex(true).expect("follower oldest")
    );
    assert_eq!(
        leader.newest_timeindex(true).expect("leader newest"),
        follower.newest_timeindex(true).expect("follower newest")
    );
}

#[test]
fn any_instance_may_append() {
    let dir = tempfile::tempdir().expect("tempdir");
    let leader =
        MultiprocessTimeSeries::<i32>::create_leader_with("feed", 100, options_in(&dir))
            .expect("leader");
    let follower =
        MultiprocessTimeSeries::<i32>::create_follower_with("feed", options_in(&dir))
            .expect("follower");

    follower.append(&7).expect("follower append");
    assert_eq!(leader.newest_timeindex(true).expect("newest"), 0);
    assert_eq!(leader.get(0).expect("get"), 7);
}

#[test]
fn factories_publish_start_and_capacity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let leader = MultiprocessTimeSeries::<f64>::create_leader_with(
        "feed",
        100,
        options_in(&dir).with_start_timeindex(25),
    )
    .expect("leader");
    let follower1 =
        MultiprocessTimeSeries::<f64>::create_follower_with("feed", options_in(&dir))
            .expect("follower1");
    let follower2 =
        MultiprocessTimeSeries::<f64>::create_follower_with("feed", options_in(&dir))
            .expect("follower2");

    assert_eq!(follower1.max_length(), 100);
    assert_eq!(follower2.max_length(), 100);
    leader.append(&1.0).expect("append");
    assert_eq!(follower1.newest_timeindex(true).expect("newest"), 25);
    assert_eq!(follower2.newest_timeindex(true).expect("newest"), 25);
}

#[test]
fn metadata_readback_without_attaching() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let _leader = MultiprocessTimeSeries::<i32>::create_leader_with(
            "feed",
            100,
            options_in(&dir).with_start_timeindex(25),
        )
        .expect("leader");
        assert_eq!(get_max_length_in("feed", dir.path()).expect("max"), 100);
        assert_eq!(
            get_start_timeindex_in("feed", dir.path()).expect("start"),
            25
        );
    }
    {
        let _leader = MultiprocessTimeSeries::<i32>::create_leader_with(
            "feed",
            200,
            options_in(&dir).with_start_timeindex(32),
        )
        .expect("leader");
        assert_eq!(get_max_length_in("feed", dir.path()).expect("max"), 200);
        assert_eq!(
            get_start_timeindex_in("feed", dir.path()).expect("start"),
            32
        );
    }
}

#[test]
fn follower_without_leader_is_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = MultiprocessTimeSeries::<i32>::create_follower_with("orphan", options_in(&dir))
        .expect_err("no leader");
    assert_eq!(err.kind(), ErrorKind::FollowerWithoutLeader);
    assert_eq!(err.segment(), Some("orphan"));
}

#[test]
fn leader_drop_wipes_the_segment() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let _leader =
            MultiprocessTimeSeries::<i32>::create_leader_with("feed", 10, options_in(&dir))
                .expect("leader");
        assert_eq!(get_max_length_in("feed", dir.path()).expect("max"), 10);
    }
    let err = MultiprocessTimeSeries::<i32>::create_follower_with("feed", options_in(&dir))
        .expect_err("wiped");
    assert_eq!(err.kind(), ErrorKind::FollowerWithoutLeader);
}

#[test]
fn clear_memory_recovers_a_stale_segment() {
    let dir = tempfile::tempdir().expect("tempdir");
    {
        let leader =
            MultiprocessTimeSeries::<i32>::create_leader_with("feed", 10, options_in(&dir))
                .expect("leader");
        leader.append(&1).expect("append");
        // Simulate an unclean shutdown: forget the leader so nothing wipes.
        std::mem::forget(leader);
    }
    assert_eq!(get_max_length_in("feed", dir.path()).expect("max"), 10);
    clear_memory_in("feed", dir.path()).expect("clear");
    let err = get_max_length_in("feed", dir.path()).expect_err("wiped");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    // Idempotent on an already clean segment.
    clear_memory_in("feed", dir.path()).expect("clear again");
}

#[test]
fn serialized_elements_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let leader =
        MultiprocessTimeSeries::<ImuFrame>::create_leader_with("imu", 100, options_in(&dir))
            .expect("leader");
    let follower =
        MultiprocessTimeSeries::<ImuFrame>::create_follower_with("imu", options_in(&dir))
            .expect("follower");

    let frame = ImuFrame {
        sensor: 5,
        acceleration: [0.5, -9.81, 0.25],
    };
    leader.append(&frame).expect("append");
    let index = follower.newest_timeindex(true).expect("newest");
    assert_eq!(index, leader.newest_timeindex(true).expect("newest"));
    assert_eq!(follower.get(index).expect("get"), frame);
}

#[test]
fn raw_cells_decode_back_to_the_element() {
    let dir = tempfile::tempdir().expect("tempdir");
    let leader =
        MultiprocessTimeSeries::<ImuFrame>::create_leader_with("imu", 100, options_in(&dir))
            .expect("leader");
    let follower =
        MultiprocessTimeSeries::<ImuFrame>::create_follower_with("imu", options_in(&dir))
            .expect("follower");

    let frame = ImuFrame {
        sensor: 9,
        acceleration: [1.0, 2.0, 3.0],
    };
    leader.append(&frame).expect("append");
    let index = follower.newest_timeindex(true).expect("newest");
    let raw = follower.get_raw(index).expect("raw");
    assert_eq!(raw.len(), ImuFrame::WIRE_LEN);
    assert_eq!(ImuFrame::decode(&raw).expect("decode"), frame);
}

#[test]
fn raw_cells_are_refused_for_fundamentals() {
    let dir = tempfile::tempdir().expect("tempdir");
    let leader =
        MultiprocessTimeSeries::<i64>::create_leader_with("plain", 10, options_in(&dir))
            .expect("leader");
    leader.append(&11).expect("append");
    let err = leader.get_raw(0).expect_err("fundamental raw");
    assert_eq!(err.kind(), ErrorKind::NotSupported);
}

#[test]
fn full_round_keeps_views_aligned() {
    let dir = tempfile::tempdir().expect("tempdir");
    let leader =
        MultiprocessTimeSeries::<ImuFrame>::create_leader_with("imu", 100, options_in(&dir))
            .expect("leader");
    let follower =
        MultiprocessTimeSeries::<ImuFrame>::create_follower_with("imu", options_in(&dir))
            .expect("follower");

    for step in 0..101u32 {
        let frame = ImuFrame {
            sensor: step,
            acceleration: [f64::from(step), 0.0, -f64::from(step)],
        };
        leader.append(&frame).expect("append");
    }

    let leader_newest = leader.newest_timeindex(true).expect("newest");
    let follower_newest = follower.newest_timeindex(true).expect("newest");
    assert_eq!(leader_newest, follower_newest);
    assert_eq!(leader_newest, 100);
    assert_eq!(follower.oldest_timeindex(true).expect("oldest"), 1);
    assert_eq!(follower.length().expect("length"), 100);
    assert_eq!(
        leader.get(leader_newest).expect("leader get"),
        follower.get(follower_newest).expect("follower get")
    );
    let err = follower.get(0).expect_err("dropped");
    assert_eq!(err.kind(), ErrorKind::TooOld);
}

#[test]
fn empty_latch_tracks_remote_appends() {
    let dir = tempfile::tempdir().expect("tempdir");
    let leader =
        MultiprocessTimeSeries::<i32>::create_leader_with("feed", 100, options_in(&dir))
            .expect("leader");
    let follower =
        MultiprocessTimeSeries::<i32>::create_follower_with("feed", options_in(&dir))
            .expect("follower");

    assert!(leader.is_empty().expect("leader empty"));
    assert!(follower.is_empty().expect("follower empty"));
    leader.append(&10).expect("append");
    assert!(!leader.is_empty().expect("leader non-empty"));
    assert!(!follower.is_empty().expect("follower non-empty"));
}

#[test]
fn blocking_read_crosses_instances() {
    let dir = tempfile::tempdir().expect("tempdir");
    let leader = Arc::new(
        MultiprocessTimeSeries::<i32>::create_leader_with("feed", 100, options_in(&dir))
            .expect("leader"),
    );
    let follower =
        MultiprocessTimeSeries::<i32>::create_follower_with("feed", options_in(&dir))
            .expect("follower");

    let writer = {
        let leader = Arc::clone(&leader);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(1));
            leader.append(&42).expect("append");
        })
    };
    assert_eq!(follower.get(0).expect("blocking get"), 42);
    writer.join().expect("join");
}

#[test]
fn clobbered_metadata_is_rejected_on_attach() {
    let dir = tempfile::tempdir().expect("tempdir");
    let _leader =
        MultiprocessTimeSeries::<i32>::create_leader_with("feed", 10, options_in(&dir))
            .expect("leader");
    std::fs::write(dir.path().join("feed_indexes"), b"NOPE").expect("clobber");
    let err = MultiprocessTimeSeries::<i32>::create_follower_with("feed", options_in(&dir))
        .expect_err("corrupt metadata");
    assert_eq!(err.kind(), ErrorKind::Corrupt);
}

#[test]
fn element_size_disagreement_is_rejected_on_attach() {
    let dir = tempfile::tempdir().expect("tempdir");
    let _leader =
        MultiprocessTimeSeries::<i32>::create_leader_with("feed", 10, options_in(&dir))
            .expect("leader");
    let err = MultiprocessTimeSeries::<i64>::create_follower_with("feed", options_in(&dir))
        .expect_err("cell size mismatch");
    assert_eq!(err.kind(), ErrorKind::Corrupt);
}

#[test]
fn tag_is_shared_between_instances() {
    let dir = tempfile::tempdir().expect("tempdir");
    let leader =
        MultiprocessTimeSeries::<i32>::create_leader_with("feed", 100, options_in(&dir))
            .expect("leader");
    let follower =
        MultiprocessTimeSeries::<i32>::create_follower_with("feed", options_in(&dir))
            .expect("follower");

    leader.append(&10).expect("append");
    let index = leader.newest_timeindex(true).expect("newest");
    leader.tag(index).expect("tag");
    assert!(!follower.has_changed_since_tag().expect("unchanged"));
    assert_eq!(follower.tagged_timeindex().expect("tagged"), index);
    follower.append(&20).expect("append");
    assert!(leader.has_changed_since_tag().expect("changed"));
}
