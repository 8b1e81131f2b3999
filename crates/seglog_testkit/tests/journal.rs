//! End-to-end journal tests over real segment files.

use seglog_core::{Journal, JournalConfig, JournalError, ASQN_IGNORE};
use seglog_testkit::{fill, payload_for, JournalFixture};

fn indices(journal: &Journal) -> Vec<u64> {
    let mut reader = journal.open_reader();
    reader.records().map(|r| r.unwrap().index()).collect()
}

#[test]
fn rollover_creates_numbered_segments() {
    let fixture = JournalFixture::new();
    let mut journal = fixture.open();
    fill(&mut journal, 10);

    assert_eq!(journal.segment_count(), 3);
    assert_eq!(
        fixture.segment_files(),
        vec!["test-1.log", "test-2.log", "test-3.log"]
    );
    assert_eq!(indices(&journal), (1..=10).collect::<Vec<_>>());

    journal.flush().unwrap();
    drop(journal);

    let journal = fixture.open();
    assert_eq!(journal.first_index(), 1);
    assert_eq!(journal.last_index(), 10);
    assert_eq!(journal.segment_count(), 3);
}

#[test]
fn record_larger_than_segment_is_rejected() {
    let fixture = JournalFixture::new();
    let mut journal = fixture.open();

    let err = journal.append(ASQN_IGNORE, vec![0u8; 1024]).unwrap_err();
    assert!(matches!(err, JournalError::RecordTooLarge { .. }));
    assert!(journal.is_empty());

    // Largest record that fits an empty segment: 192 - 32 - 24
    journal.append(ASQN_IGNORE, vec![7u8; 136]).unwrap();
    journal.append(ASQN_IGNORE, vec![8u8; 136]).unwrap();
    assert_eq!(journal.segment_count(), 2);
}

#[test]
fn truncate_across_segments() {
    let fixture = JournalFixture::new();
    let mut journal = fixture.open();
    fill(&mut journal, 10);
    journal.flush().unwrap();

    journal.truncate(3).unwrap();
    assert_eq!(journal.last_index(), 3);
    assert_eq!(journal.last_flushed_index(), 3);
    assert_eq!(fixture.segment_files(), vec!["test-1.log"]);

    // Appends continue in the cut segment
    fill(&mut journal, 2);
    assert_eq!(journal.segment_count(), 2);
    journal.flush().unwrap();
    drop(journal);

    let journal = fixture.open();
    assert_eq!(indices(&journal), (1..=5).collect::<Vec<_>>());
    let mut reader = journal.open_reader();
    reader.seek(4);
    assert_eq!(reader.next().unwrap().data(), payload_for(4));
}

#[test]
fn truncate_below_first_empties_journal() {
    let fixture = JournalFixture::new();
    let mut journal = fixture.open();
    fill(&mut journal, 10);
    journal.flush().unwrap();

    journal.truncate(0).unwrap();
    assert!(journal.is_empty());
    assert_eq!(journal.next_index(), 1);
    assert_eq!(journal.last_flushed_index(), 0);
    assert_eq!(fixture.segment_files(), vec!["test-4.log"]);
    drop(journal);

    let mut journal = fixture.open();
    assert!(journal.is_empty());
    assert_eq!(journal.append(ASQN_IGNORE, payload_for(1)).unwrap().index(), 1);
}

#[test]
fn compact_removes_whole_segments() {
    let fixture = JournalFixture::new();
    let mut journal = fixture.open();
    fill(&mut journal, 10);

    journal.compact(6).unwrap();
    assert_eq!(journal.first_index(), 5);
    assert_eq!(fixture.segment_files(), vec!["test-2.log", "test-3.log"]);

    let mut reader = journal.open_reader();
    assert_eq!(reader.seek(1), 5);
    assert_eq!(reader.next().unwrap().data(), payload_for(5));

    // The active segment always survives
    journal.compact(100).unwrap();
    assert_eq!(journal.first_index(), 9);
    assert_eq!(fixture.segment_files(), vec!["test-3.log"]);
    journal.flush().unwrap();
    drop(journal);

    let journal = fixture.open();
    assert_eq!(journal.first_index(), 9);
    assert_eq!(indices(&journal), vec![9, 10]);
}

#[test]
fn failed_compaction_keeps_remaining_segments_readable() {
    let fixture = JournalFixture::new();
    let control = fixture.control();
    let mut journal = fixture.open_crashable();
    fill(&mut journal, 12);
    assert_eq!(journal.segment_count(), 3);

    // Segment 1 goes, segment 2 refuses to
    control.fail_remove_after(1);
    assert!(journal.compact(100).is_err());
    assert_eq!(journal.first_index(), 5);
    assert_eq!(journal.segment_count(), 2);
    assert_eq!(fixture.segment_files(), vec!["test-2.log", "test-3.log"]);

    let mut reader = journal.open_reader();
    assert_eq!(reader.seek(1), 5);
    assert_eq!(reader.next().unwrap().data(), payload_for(5));
    drop(reader);

    control.reset();
    journal.compact(100).unwrap();
    assert_eq!(journal.first_index(), 9);
    assert_eq!(fixture.segment_files(), vec!["test-3.log"]);
    assert_eq!(indices(&journal), vec![9, 10, 11, 12]);
}

#[test]
fn truncate_on_empty_journal_is_a_no_op() {
    let fixture = JournalFixture::with_config(|config| config.first_index(5));
    let mut journal = fixture.open();
    let files = fixture.segment_files();

    journal.truncate(2).unwrap();
    assert!(journal.is_empty());
    assert_eq!(journal.first_index(), 5);
    assert_eq!(journal.next_index(), 5);
    assert_eq!(journal.last_flushed_index(), 0);
    assert_eq!(fixture.segment_files(), files);
    drop(journal);

    let mut journal = fixture.open();
    assert_eq!(journal.next_index(), 5);
    assert_eq!(journal.append(ASQN_IGNORE, payload_for(5)).unwrap().index(), 5);
}

#[test]
fn reset_restarts_at_index() {
    let fixture = JournalFixture::new();
    let mut journal = fixture.open();
    fill(&mut journal, 5);
    journal.flush().unwrap();

    assert!(matches!(
        journal.reset(0),
        Err(JournalError::InvalidOperation { .. })
    ));

    journal.reset(100).unwrap();
    assert_eq!(journal.first_index(), 100);
    assert_eq!(journal.last_index(), 99);
    assert!(journal.is_empty());
    assert_eq!(journal.append(ASQN_IGNORE, payload_for(100)).unwrap().index(), 100);
    journal.flush().unwrap();
    drop(journal);

    let journal = fixture.open();
    assert_eq!(journal.first_index(), 100);
    assert_eq!(journal.last_index(), 100);
}

#[test]
fn configured_first_index() {
    let fixture = JournalFixture::with_config(|config| config.first_index(42));
    let mut journal = fixture.open();
    assert_eq!(journal.next_index(), 42);
    assert_eq!(journal.append(ASQN_IGNORE, payload_for(42)).unwrap().index(), 42);

    let mut reader = journal.open_reader();
    assert_eq!(reader.seek(0), 42);
    assert_eq!(reader.seek_to_last(), 42);
}

#[test]
fn asqn_seek_after_reopen() {
    let fixture = JournalFixture::new();
    {
        let mut journal = fixture.open();
        for i in 1..=12u64 {
            let asqn = if i % 2 == 0 { i as i64 * 10 } else { ASQN_IGNORE };
            journal.append(asqn, payload_for(i)).unwrap();
        }
        journal.flush().unwrap();
    }

    let mut journal = fixture.open();
    let mut reader = journal.open_reader();
    assert_eq!(reader.seek_to_asqn(55).unwrap(), 4);
    assert_eq!(reader.next().unwrap().asqn(), 40);
    assert_eq!(reader.seek_to_asqn(120).unwrap(), 12);
    assert_eq!(reader.seek_to_asqn(5).unwrap(), 1);
    assert_eq!(reader.seek_to_asqn_with_upper_bound(120, 9).unwrap(), 8);

    assert!(matches!(
        journal.append(100, b"old".to_vec()),
        Err(JournalError::InvalidAsqn { last: 120, .. })
    ));
}

#[test]
fn replicated_records_are_stored_verbatim() {
    let leader = JournalFixture::new();
    let follower = JournalFixture::new();
    let mut source = leader.open();
    fill(&mut source, 6);

    let mut target = follower.open();
    let mut reader = source.open_reader();
    for record in reader.records() {
        target.append_record(&record.unwrap()).unwrap();
    }
    assert_eq!(target.last_record().unwrap(), source.last_record().unwrap());

    let stale = source.open_reader().next().unwrap();
    assert!(matches!(
        target.append_record(&stale),
        Err(JournalError::InvalidIndex { expected: 7, actual: 1 })
    ));
}

#[test]
fn second_writer_is_locked_out() {
    let fixture = JournalFixture::new();
    let journal = fixture.open();

    let result = Journal::open(fixture.config().clone());
    assert!(matches!(result, Err(JournalError::JournalLocked)));

    // Another journal name in the same directory is independent
    let other = Journal::open(JournalConfig::new(fixture.path()).name("other"));
    assert!(other.is_ok());

    drop(journal);
    assert!(Journal::open(fixture.config().clone()).is_ok());
}

#[test]
fn close_stops_readers() {
    let fixture = JournalFixture::new();
    let mut journal = fixture.open();
    fill(&mut journal, 2);
    let mut reader = journal.open_reader();

    journal.close().unwrap();
    journal.close().unwrap();
    assert!(journal.is_closed());
    assert_eq!(journal.last_flushed_index(), 2);
    assert!(matches!(reader.next(), Err(JournalError::Closed)));
    assert!(matches!(
        journal.append(ASQN_IGNORE, b"late".to_vec()),
        Err(JournalError::Closed)
    ));
}
