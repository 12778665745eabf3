//! End-to-end pipeline runs against a shell-script stand-in for qobuz-dl.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hifibot::messenger::{Button, ChatAction, ChatId, MessageId};
use hifibot::{
    AudioPayload, AudioSource, CacheGateway, DeliveryState, ErrorKind, Messenger, Orchestrator,
    PipelineSettings, QobuzDl, Quality, ReplyTarget, Request, SqliteCache, WorkspaceManager,
};

#[derive(Default)]
struct Outbox {
    texts: Mutex<Vec<String>>,
    audio: Mutex<Vec<AudioPayload>>,
}

#[async_trait]
impl Messenger for Outbox {
    async fn send_text(&self, _chat: ChatId, text: &str) -> hifibot::Result<MessageId> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(1)
    }

    async fn send_buttons(&self, _chat: ChatId, text: &str, _buttons: &[Button]) -> hifibot::Result<MessageId> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(2)
    }

    async fn edit_text(&self, _chat: ChatId, _message: MessageId, text: &str) -> hifibot::Result<()> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn send_audio(&self, _chat: ChatId, audio: &AudioPayload) -> hifibot::Result<String> {
        self.audio.lock().unwrap().push(audio.clone());
        Ok(match &audio.source {
            AudioSource::Remote(id) => id.clone(),
            AudioSource::File(path) => {
                assert!(path.exists(), "uploaded file must exist during delivery");
                "BQACAgIAAxkBAAIC".to_string()
            }
        })
    }

    async fn answer_callback(&self, _id: &str, _text: Option<&str>) -> hifibot::Result<()> {
        Ok(())
    }

    async fn send_action(&self, _chat: ChatId, _action: ChatAction) -> hifibot::Result<()> {
        Ok(())
    }
}

/// Install a fake downloader that logs its arguments, then runs `body` with
/// `$out` set to the `-d` directory.
fn fake_tool(dir: &Path, body: &str) -> (PathBuf, PathBuf) {
    let log = dir.join("calls.log");
    let script = dir.join("qobuz-dl");
    let text = format!(
        "#!/bin/sh\n\
         echo \"$@\" >> '{log}'\n\
         out=\"\"\n\
         while [ $# -gt 0 ]; do\n\
           if [ \"$1\" = \"-d\" ]; then out=\"$2\"; fi\n\
           shift\n\
         done\n\
         {body}\n",
        log = log.display(),
    );
    std::fs::write(&script, text).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    (script, log)
}

fn calls(log: &Path) -> Vec<String> {
    std::fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

const WRITES_FLAC: &str =
    "mkdir -p \"$out/Miles Davis/Kind of Blue\" && printf flac > \"$out/Miles Davis/Kind of Blue/01 - So What.flac\"";

struct Env {
    tmp: tempfile::TempDir,
    log: PathBuf,
    outbox: Arc<Outbox>,
    orchestrator: Orchestrator,
}

impl Env {
    fn downloads(&self) -> PathBuf {
        self.tmp.path().join("downloads")
    }

    fn db(&self) -> PathBuf {
        self.tmp.path().join("cache.db")
    }
}

fn env(body: &str, fetch_timeout: Duration) -> Env {
    let tmp = tempfile::tempdir().unwrap();
    let (script, log) = fake_tool(tmp.path(), body);
    let outbox = Arc::new(Outbox::default());
    let cache = Arc::new(SqliteCache::open(tmp.path().join("cache.db")).unwrap());
    let settings = PipelineSettings {
        fetch_timeout,
        ..PipelineSettings::default()
    };
    let orchestrator = Orchestrator::new(
        WorkspaceManager::new(tmp.path().join("downloads")),
        Arc::new(QobuzDl::new(script)),
        cache,
        outbox.clone(),
        settings,
    );
    Env {
        tmp,
        log,
        outbox,
        orchestrator,
    }
}

#[tokio::test]
async fn test_fresh_download_then_cache_hit() {
    let env = env(WRITES_FLAC, Duration::from_secs(30));
    let request = Request::new("https://open.qobuz.com/track/19512574", Quality::HiRes);

    let first = env.orchestrator.handle(&request, ReplyTarget::new(7)).await;
    assert!(first.is_done(), "{:?}", first.states);
    assert!(!first.from_cache());
    assert_eq!(first.key, "qobuz:track:19512574@hires");
    assert!(!env.downloads().exists());

    let args = calls(&env.log);
    assert_eq!(args.len(), 1);
    assert!(args[0].starts_with("dl https://open.qobuz.com/track/19512574 -q 27 -d "));

    {
        let audio = env.outbox.audio.lock().unwrap();
        assert_eq!(audio.len(), 1);
        assert_eq!(audio[0].title.as_deref(), Some("So What"));
        assert_eq!(audio[0].performer.as_deref(), Some("Miles Davis"));
    }

    let second = env.orchestrator.handle(&request, ReplyTarget::new(7)).await;
    assert!(second.is_done() && second.from_cache());
    assert_eq!(second.remote_file_ref.as_deref(), Some("BQACAgIAAxkBAAIC"));
    assert_eq!(calls(&env.log).len(), 1, "cache hit must not fetch");
}

#[tokio::test]
async fn test_cache_survives_reopen() {
    let env = env(WRITES_FLAC, Duration::from_secs(30));
    let request = Request::new("https://open.qobuz.com/track/42", Quality::Standard);
    assert!(env.orchestrator.handle(&request, ReplyTarget::new(7)).await.is_done());

    let reopened = SqliteCache::open(env.db()).unwrap();
    let entry = reopened.lookup("qobuz:track:42@standard").await.unwrap().unwrap();
    assert_eq!(entry.remote_file_ref, "BQACAgIAAxkBAAIC");
    assert_eq!(entry.quality, Quality::Standard);
    assert!(reopened.lookup("qobuz:track:42@hires").await.unwrap().is_none());
}

#[tokio::test]
async fn test_schemeless_track_link_is_fetched_by_id() {
    let env = env(WRITES_FLAC, Duration::from_secs(30));
    let report = env
        .orchestrator
        .handle(&Request::new("qobuz.com/track/555", Quality::HiRes), ReplyTarget::new(7))
        .await;
    assert!(report.is_done());
    assert_eq!(report.key, "qobuz:track:555@hires");

    let args = calls(&env.log);
    assert_eq!(args.len(), 1);
    assert!(
        args[0].starts_with("dl https://open.qobuz.com/track/555 -q 27 -d "),
        "{}",
        args[0]
    );
}

#[tokio::test]
async fn test_album_page_link_is_fetched_by_id() {
    let env = env(WRITES_FLAC, Duration::from_secs(30));
    let report = env
        .orchestrator
        .handle(
            &Request::new("qobuz.com/album/0886443927087", Quality::Standard),
            ReplyTarget::new(7),
        )
        .await;
    assert!(report.is_done());
    assert_eq!(report.key, "qobuz:album:0886443927087@standard");
    assert!(calls(&env.log)[0].starts_with("dl https://open.qobuz.com/album/0886443927087 -q 6 "));
}

#[tokio::test]
async fn test_search_uses_lucky_mode() {
    let env = env(WRITES_FLAC, Duration::from_secs(30));
    let report = env
        .orchestrator
        .handle(&Request::new("Miles Davis So What", Quality::Standard), ReplyTarget::new(7))
        .await;
    assert!(report.is_done());
    assert_eq!(report.key, "query:miles davis so what@standard");

    let args = calls(&env.log);
    assert!(args[0].starts_with("lucky Miles Davis So What -t track -n 1 -q 6 -d "));
}

#[tokio::test]
async fn test_tool_failure_without_file() {
    let env = env("echo 'track not available' >&2; exit 1", Duration::from_secs(30));
    let report = env
        .orchestrator
        .handle(&Request::new("https://open.qobuz.com/track/1", Quality::HiRes), ReplyTarget::new(7))
        .await;

    assert_eq!(report.terminal(), DeliveryState::Failed);
    assert_eq!(report.error, Some(ErrorKind::FetchProcess));
    assert!(report.visited(DeliveryState::Cleanup));
    assert!(!env.downloads().exists());
    assert!(env.outbox.audio.lock().unwrap().is_empty());
    assert_eq!(
        env.outbox.texts.lock().unwrap().last().map(String::as_str),
        Some("Failed: Download failed.")
    );
    assert_eq!(
        SqliteCache::open(env.db()).unwrap().count().await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_clean_exit_without_file() {
    let env = env("exit 0", Duration::from_secs(30));
    let report = env
        .orchestrator
        .handle(&Request::new("nothing matches this", Quality::HiRes), ReplyTarget::new(7))
        .await;

    assert_eq!(report.error, Some(ErrorKind::ArtifactNotFound));
    assert!(report.visited(DeliveryState::NotFound));
    assert!(!env.downloads().exists());
}

#[tokio::test]
async fn test_hung_tool_times_out() {
    let env = env("sleep 30", Duration::from_millis(300));
    let started = std::time::Instant::now();
    let report = env
        .orchestrator
        .handle(&Request::new("https://open.qobuz.com/track/9", Quality::HiRes), ReplyTarget::new(7))
        .await;

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.error, Some(ErrorKind::Timeout));
    assert!(!env.downloads().exists());
    assert_eq!(
        env.outbox.texts.lock().unwrap().last().map(String::as_str),
        Some("Failed: Download timed out.")
    );
}

#[tokio::test]
async fn test_timed_out_tool_leaves_no_late_writer() {
    let env = env(
        "( sleep 1; mkdir -p \"$out/Late/Album\"; printf x > \"$out/Late/Album/01 - Late.flac\" ) & sleep 30",
        Duration::from_millis(300),
    );
    let report = env
        .orchestrator
        .handle(&Request::new("https://open.qobuz.com/track/9", Quality::HiRes), ReplyTarget::new(7))
        .await;
    assert_eq!(report.error, Some(ErrorKind::Timeout));
    assert!(!env.downloads().exists());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(
        !env.downloads().exists(),
        "a helper forked by the tool wrote into the workspace after the timeout"
    );
}

#[tokio::test]
async fn test_missing_tool_fails_cleanly() {
    let tmp = tempfile::tempdir().unwrap();
    let outbox = Arc::new(Outbox::default());
    let orchestrator = Orchestrator::new(
        WorkspaceManager::new(tmp.path().join("downloads")),
        Arc::new(QobuzDl::new(tmp.path().join("no-such-tool"))),
        Arc::new(SqliteCache::open_in_memory().unwrap()),
        outbox.clone(),
        PipelineSettings::default(),
    );

    let report = orchestrator
        .handle(&Request::new("so what", Quality::HiRes), ReplyTarget::new(7))
        .await;
    assert_eq!(report.error, Some(ErrorKind::FetchProcess));
    assert!(!tmp.path().join("downloads").exists());
}
