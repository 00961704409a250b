//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use revsync::{Engine, EngineConfig, EngineHandle, SessionSnapshot};
use revsync_core::{
    AnalysisBackend, CanonicalAddress, Canonicalizer, EffectiveAddress, ImageBase, MemoryBackend,
};
use revsync_sync::{MemoryBroker, MemoryTransport};

/// Binary shared by default fixtures.
pub const TEST_BINARY: &[u8] = b"\x7fELF revsync test binary";

/// How long [`eventually`] waits.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// One analyst: a memory backend, a broker connection and a running engine.
pub struct PeerFixture {
    pub nick: String,
    pub backend: Arc<MemoryBackend>,
    pub transport: Arc<MemoryTransport>,
    pub engine: EngineHandle,
}

impl PeerFixture {
    /// Start a peer analyzing [`TEST_BINARY`] loaded at `base`.
    pub fn start(broker: &Arc<MemoryBroker>, nick: &str, base: u64) -> Self {
        let backend = MemoryBackend::new(TEST_BINARY.to_vec(), ImageBase(base));
        Self::with_backend(broker, EngineConfig::with_nick(nick), backend)
    }

    /// Start a peer with an explicit config and backend.
    pub fn with_backend(
        broker: &Arc<MemoryBroker>,
        config: EngineConfig,
        backend: MemoryBackend,
    ) -> Self {
        let nick = config.nick.clone();
        let backend = Arc::new(backend);
        let transport = Arc::new(broker.connect(nick.clone()));
        let engine = Engine::start(config, backend.clone(), transport.clone());
        Self {
            nick,
            backend,
            transport,
            engine,
        }
    }

    /// Effective address of canonical offset `offset` in this peer's database.
    pub fn ea(&self, offset: u64) -> EffectiveAddress {
        Canonicalizer::new(self.backend.image_base()).to_effective(CanonicalAddress(offset))
    }

    /// Open the file and report the resulting session.
    pub async fn open(&self) -> revsync::Result<SessionSnapshot> {
        self.engine.on_file_opened().await?;
        self.engine.session().await
    }

    /// Type `text` into the primary comment at `ea`.
    pub async fn set_comment(&self, ea: EffectiveAddress, text: &str) -> revsync::Result<()> {
        self.backend.set_comment(ea, false, text);
        self.engine.on_comment_changed(ea, false).await
    }

    /// Type `text` into the repeatable comment at `ea`.
    pub async fn set_repeatable_comment(
        &self,
        ea: EffectiveAddress,
        text: &str,
    ) -> revsync::Result<()> {
        self.backend.set_comment(ea, true, text);
        self.engine.on_comment_changed(ea, true).await
    }

    /// Type `text` into extra comment line `line` at `ea`.
    pub async fn set_extra_comment(
        &self,
        ea: EffectiveAddress,
        line: u32,
        text: &str,
    ) -> revsync::Result<()> {
        self.backend.set_extra_comment(ea, line, text);
        self.engine.on_extra_comment_changed(ea, line, false).await
    }

    /// Rename `ea` locally.
    pub async fn rename(&self, ea: EffectiveAddress, name: &str) -> revsync::Result<()> {
        self.backend.write_name(ea, name)?;
        self.engine.on_rename(ea, name).await
    }

    pub async fn digest(&self) -> revsync::Result<[u8; 32]> {
        self.engine.state_digest().await
    }
}

/// Start and open one peer per nick. Each peer loads the binary at a
/// different base, so every exchange goes through canonicalization.
pub async fn peers(broker: &Arc<MemoryBroker>, nicks: &[&str]) -> Vec<PeerFixture> {
    let mut out = Vec::with_capacity(nicks.len());
    for (i, nick) in nicks.iter().enumerate() {
        let peer = PeerFixture::start(broker, nick, 0x400000 + (i as u64) * 0x10000);
        // A peer that cannot open is a broken fixture, not a test outcome.
        peer.open().await.expect("fixture peer failed to open");
        out.push(peer);
    }
    out
}

/// Poll `check` until it holds or [`SETTLE_TIMEOUT`] elapses.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + SETTLE_TIMEOUT;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until every peer reports the same comment-state digest.
pub async fn wait_converged(peers: &[PeerFixture]) -> bool {
    eventually(move || async move {
        let mut digests = Vec::with_capacity(peers.len());
        for peer in peers {
            match peer.digest().await {
                Ok(d) => digests.push(d),
                Err(_) => return false,
            }
        }
        digests.windows(2).all(|w| w[0] == w[1])
    })
    .await
}
