mod common;

use std::fs;

use mailsync::{
    filename::{FilenameGenerator, TEMP_PREFIX},
    mailbox::RemoteReference,
    message::{header_block, MailParserCodec, MessageCodec, MessageHeaders, MessageIdentifier},
    remote::RemoteIdentifierFetcher,
    retry::RetryPolicy,
    transfer::{self, Download, Transporter},
    CancellationToken,
};
use tempfile::tempdir;

use self::common::{fast_retry_policy, file_names, message, FakeMailbox};

fn id(value: &str) -> MessageIdentifier {
    MessageIdentifier::from_header_value(value).unwrap()
}

/// Codec cancelling the given token as soon as a message is parsed,
/// which happens between the fetch and the write of a download.
struct CancellingCodec(CancellationToken);

impl MessageCodec for CancellingCodec {
    fn decode_header_value(&self, raw: &[u8]) -> String {
        MailParserCodec.decode_header_value(raw)
    }

    fn parse_headers(&self, raw: &[u8]) -> MessageHeaders {
        self.0.cancel();
        MailParserCodec.parse_headers(raw)
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_download_resolves_stale_references() {
    let dir = tempdir().unwrap();
    let cancel = CancellationToken::new();

    let mailbox = FakeMailbox::new(1);
    let uid = mailbox.insert(message("<a@localhost>", "Message A"));
    let reference = RemoteReference::new(uid, 1);

    // the folder got a new generation since the scan
    mailbox.renumber(2);

    let report = Transporter::new(mailbox.clone(), "INBOX")
        .with_pool_size(1)
        .with_retry_policy(fast_retry_policy())
        .run(Download::new(dir.path()), vec![(id("<a@localhost>"), reference)], &cancel)
        .await
        .unwrap();

    assert_eq!(report.transferred.len(), 1);
    assert!(report.failed.is_empty());

    let names = file_names(dir.path());
    assert_eq!(names.len(), 1);
    assert!(names[0].ends_with(".eml"));
    assert_eq!(
        fs::read(dir.path().join(&names[0])).unwrap(),
        message("<a@localhost>", "Message A")
    );
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_download_reports_vanished_messages() {
    let dir = tempdir().unwrap();
    let cancel = CancellationToken::new();

    let mailbox = FakeMailbox::new(1);
    let uid = mailbox.insert(message("<a@localhost>", "Message A"));

    let items = vec![
        (id("<a@localhost>"), RemoteReference::new(uid, 1)),
        (id("<gone@localhost>"), RemoteReference::new(42, 1)),
    ];

    let report = Transporter::new(mailbox.clone(), "INBOX")
        .with_pool_size(2)
        .with_retry_policy(fast_retry_policy())
        .run(Download::new(dir.path()), items, &cancel)
        .await
        .unwrap();

    assert_eq!(report.transferred.len(), 1);
    assert_eq!(report.failed.len(), 1);

    let (failed_id, err) = &report.failed[0];
    assert_eq!(failed_id, "<gone@localhost>");
    assert!(matches!(err, transfer::Error::MessageVanishedError(_, r) if r.uid == 42));
    assert_eq!(file_names(dir.path()).len(), 1);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_download_avoids_overwrites() {
    let dir = tempdir().unwrap();
    let cancel = CancellationToken::new();

    let mailbox = FakeMailbox::new(1);
    let a = mailbox.insert(message("<a@localhost>", "Same subject"));
    let b = mailbox.insert(message("<b@localhost>", "Same subject"));

    let items = vec![
        (id("<a@localhost>"), RemoteReference::new(a, 1)),
        (id("<b@localhost>"), RemoteReference::new(b, 1)),
    ];

    let report = Transporter::new(mailbox.clone(), "INBOX")
        .with_pool_size(2)
        .with_retry_policy(fast_retry_policy())
        .run(Download::new(dir.path()), items, &cancel)
        .await
        .unwrap();

    assert_eq!(report.transferred.len(), 2);
    assert_eq!(file_names(dir.path()).len(), 2);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_download_retries_on_conflict() {
    let dir = tempdir().unwrap();
    let cancel = CancellationToken::new();

    let mailbox = FakeMailbox::new(1);
    let raw = message("<a@localhost>", "Message A");
    let uid = mailbox.insert(&raw);

    // draw the names the download is going to draw: a temporary
    // one, then the final one, which gets taken in the meantime
    let headers = MailParserCodec.parse_headers(header_block(&raw));
    let date = headers.date.as_ref();
    let names = FilenameGenerator::new().with_seed(42);
    names.generate(dir.path(), date, "Message A", true).unwrap();
    let taken = names.generate(dir.path(), date, "Message A", false).unwrap();
    fs::write(dir.path().join(&taken), b"not a message").unwrap();

    let download =
        Download::new(dir.path()).with_filename_generator(FilenameGenerator::new().with_seed(42));

    let report = Transporter::new(mailbox.clone(), "INBOX")
        .with_pool_size(1)
        .with_retry_policy(fast_retry_policy())
        .run(download, vec![(id("<a@localhost>"), RemoteReference::new(uid, 1))], &cancel)
        .await
        .unwrap();

    assert_eq!(report.transferred.len(), 1);
    assert!(report.failed.is_empty());

    let saved = report.transferred[0].saved.as_ref().unwrap();
    assert_ne!(saved.path, dir.path().join(&taken));
    assert_eq!(fs::read(&saved.path).unwrap(), raw);
    assert_eq!(fs::read(dir.path().join(&taken)).unwrap(), b"not a message");

    // the temporary file of the first attempt was removed
    let names = file_names(dir.path());
    assert_eq!(names.len(), 2);
    assert!(names.iter().all(|name| !name.starts_with(TEMP_PREFIX)));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_download_cancelled_before_write() {
    let dir = tempdir().unwrap();
    let cancel = CancellationToken::new();

    let mailbox = FakeMailbox::new(1);
    let uid = mailbox.insert(message("<a@localhost>", "Message A"));

    let download = Download::new(dir.path())
        .with_codec(std::sync::Arc::new(CancellingCodec(cancel.clone())));

    let err = Transporter::new(mailbox.clone(), "INBOX")
        .with_pool_size(1)
        .with_retry_policy(fast_retry_policy())
        .run(download, vec![(id("<a@localhost>"), RemoteReference::new(uid, 1))], &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, transfer::Error::InterruptedError));
    assert!(file_names(dir.path()).is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_download_times_out_hanging_fetch() {
    let dir = tempdir().unwrap();
    let cancel = CancellationToken::new();

    let mailbox = FakeMailbox::new(1);
    let uid = mailbox.insert(message("<a@localhost>", "Message A"));
    mailbox.with(|state| state.hang_fetch_messages = 1);

    let policy = RetryPolicy {
        timeout_ms: 200,
        ..fast_retry_policy()
    };

    let report = Transporter::new(mailbox.clone(), "INBOX")
        .with_pool_size(1)
        .with_retry_policy(policy)
        .run(
            Download::new(dir.path()),
            vec![(id("<a@localhost>"), RemoteReference::new(uid, 1))],
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(report.transferred.len(), 1);
    assert!(report.failed.is_empty());
    assert_eq!(file_names(dir.path()).len(), 1);
    // the hanging session was replaced
    assert_eq!(mailbox.with(|state| state.connects), 2);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_transfer_cancelled() {
    let dir = tempdir().unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mailbox = FakeMailbox::new(1);
    let uid = mailbox.insert(message("<a@localhost>", "Message A"));

    let err = Transporter::new(mailbox.clone(), "INBOX")
        .run(
            Download::new(dir.path()),
            vec![(id("<a@localhost>"), RemoteReference::new(uid, 1))],
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, transfer::Error::InterruptedError));
    assert!(file_names(dir.path()).is_empty());
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_remote_fetch_chunks_and_limit() {
    let cancel = CancellationToken::new();
    let mailbox = FakeMailbox::new(7);

    for n in 0..25 {
        mailbox.insert(message(&format!("<{n}@localhost>"), "Message"));
    }

    let fetcher = RemoteIdentifierFetcher::new(mailbox.clone(), "INBOX")
        .with_pool_size(3)
        .with_retry_policy(fast_retry_policy());
    assert_eq!(fetcher.chunk_size(25), 8);

    let scan = fetcher.fetch(&cancel).await.unwrap();
    assert_eq!(scan.records.len(), 25);
    assert_eq!(scan.report.refs, 25);
    assert_eq!(scan.report.invalid, 0);
    assert_eq!(scan.records[&id("<0@localhost>")], RemoteReference::new(1, 7));

    let scan = fetcher.with_limit(10).fetch(&cancel).await.unwrap();
    assert_eq!(scan.records.len(), 10);
    assert!(scan.records.contains_key(&id("<9@localhost>")));
    assert!(!scan.records.contains_key(&id("<10@localhost>")));
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_remote_fetch_times_out_hanging_chunk() {
    let cancel = CancellationToken::new();
    let mailbox = FakeMailbox::new(1);

    for n in 0..3 {
        mailbox.insert(message(&format!("<{n}@localhost>"), "Message"));
    }

    mailbox.with(|state| state.hang_fetch_headers = 1);

    let policy = RetryPolicy {
        timeout_ms: 200,
        ..fast_retry_policy()
    };

    let scan = RemoteIdentifierFetcher::new(mailbox.clone(), "INBOX")
        .with_pool_size(1)
        .with_retry_policy(policy)
        .fetch(&cancel)
        .await
        .unwrap();

    assert_eq!(scan.records.len(), 3);
    assert_eq!(mailbox.with(|state| state.hang_fetch_headers), 0);
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_remote_fetch_refused_connection() {
    let cancel = CancellationToken::new();
    let mailbox = FakeMailbox::new(1);
    mailbox.insert(message("<a@localhost>", "Message A"));
    mailbox.with(|state| state.refuse_connects = 1);

    let err = RemoteIdentifierFetcher::new(mailbox.clone(), "INBOX")
        .fetch(&cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, mailsync::remote::Error::OpenSessionError(_, folder) if folder == "INBOX"));
}
