//! Ref advertisement and receive-pack.
//!
//! Stateless per request: `advertise_refs` renders the smart-HTTP ref
//! advertisement, `receive_pack` parses ref-update commands and an optional
//! packfile from a push body, applies each command independently, and
//! renders the per-ref status report. Every push failure is reported
//! in-band; an `Err` escaping `receive_pack` is a defect, not a protocol
//! outcome.

use crate::pktline::{Decoder, PktLine, PktWriter, MAX_PAYLOAD};
use crate::plumbing::Plumbing;
use crate::{GitError, ObjectId, Result};
use parking_lot::Mutex;
use rowgit_store::{ChunkFs, StoreError};
use sha1::{Digest, Sha1};
use std::sync::Arc;

/// The only smart service this server speaks.
pub const RECEIVE_PACK_SERVICE: &str = "git-receive-pack";

/// Default push packfile ceiling: 100 MiB.
pub const DEFAULT_MAX_PACK_BYTES: u64 = 100 * 1024 * 1024;

const PACK_SIGNATURE: &[u8] = b"PACK";
const BASE_CAPABILITIES: &str = "report-status delete-refs ofs-delta";
const UNPACK_FAILED_REASON: &str = "unpack failed";
const DEFAULT_BRANCH: &str = "main";

// Failure reasons can quote client input, which may itself be a maximum-size
// pkt-line; unclipped they would make the report line unframeable.
const MAX_REASON_BYTES: usize = 256;

fn clip(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Protocol engine configuration.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Pushes whose packfile exceeds this many bytes are rejected outright.
    pub max_pack_bytes: u64,
    /// Agent string advertised to clients.
    pub agent: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_pack_bytes: DEFAULT_MAX_PACK_BYTES,
            agent: format!("rowgit/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// One parsed ref-update command from a push request.
#[derive(Debug, Clone)]
pub struct RefUpdate {
    /// OID the client believes the ref currently has (zero for create).
    pub old: ObjectId,
    /// OID the ref should move to (zero for delete).
    pub new: ObjectId,
    /// Full ref name.
    pub name: String,
}

impl RefUpdate {
    /// True when the command deletes the ref.
    pub fn is_delete(&self) -> bool {
        self.new.is_zero()
    }

    fn parse(payload: &[u8], first: bool) -> Result<Self> {
        let line = std::str::from_utf8(payload)
            .map_err(|_| GitError::Protocol("command line is not UTF-8".to_string()))?;
        let line = line.trim_end_matches('\n');
        // Only the first command line may carry a capability suffix.
        let line = if first {
            line.split('\0').next().unwrap_or(line)
        } else {
            line
        };

        let mut parts = line.splitn(3, ' ');
        let (old, new, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(old), Some(new), Some(name)) if !name.is_empty() => (old, new, name),
            _ => {
                return Err(GitError::Protocol(format!(
                    "malformed command line {:?}",
                    line
                )))
            }
        };
        Ok(Self {
            old: ObjectId::from_hex(old)?,
            new: ObjectId::from_hex(new)?,
            name: name.to_string(),
        })
    }
}

/// Per-ref application outcome, reported in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefUpdateResult {
    /// The ref was applied.
    Ok {
        /// Full ref name.
        name: String,
    },
    /// The ref was rejected.
    Ng {
        /// Full ref name.
        name: String,
        /// Reason rendered after `ng <ref>`.
        reason: String,
    },
}

impl RefUpdateResult {
    fn name(&self) -> &str {
        match self {
            Self::Ok { name } | Self::Ng { name, .. } => name,
        }
    }

    fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// One repository's protocol-facing state.
///
/// Holds the chunk filesystem, the plumbing collaborator and a memoized
/// ref listing. The host serializes access per repository, so the cache
/// only needs interior mutability, not coordination. The cache is dropped
/// after a push that changed at least one ref.
pub struct RepoSession<P: Plumbing> {
    fs: Arc<ChunkFs>,
    plumbing: P,
    config: ProtocolConfig,
    cached_refs: Mutex<Option<Vec<(String, ObjectId)>>>,
}

impl<P: Plumbing> RepoSession<P> {
    /// Creates a session over a chunk filesystem and plumbing collaborator.
    pub fn new(fs: Arc<ChunkFs>, plumbing: P, config: ProtocolConfig) -> Self {
        Self {
            fs,
            plumbing,
            config,
            cached_refs: Mutex::new(None),
        }
    }

    /// The underlying chunk filesystem.
    pub fn fs(&self) -> &ChunkFs {
        &self.fs
    }

    /// The plumbing collaborator.
    pub fn plumbing(&self) -> &P {
        &self.plumbing
    }

    /// The protocol configuration.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// All resolvable refs sorted by name, memoized until invalidated.
    pub fn refs(&self) -> Result<Vec<(String, ObjectId)>> {
        let mut cache = self.cached_refs.lock();
        if let Some(refs) = cache.as_ref() {
            return Ok(refs.clone());
        }
        let mut refs = self.plumbing.list_refs()?;
        refs.sort_by(|a, b| a.0.cmp(&b.0));
        *cache = Some(refs.clone());
        Ok(refs)
    }

    /// Drops the memoized ref listing.
    pub fn invalidate_refs(&self) {
        *self.cached_refs.lock() = None;
    }
}

fn capability_line<P: Plumbing>(session: &RepoSession<P>) -> Result<String> {
    let mut caps = String::from(BASE_CAPABILITIES);
    if let Some(branch) = session.plumbing().head_branch()? {
        caps.push_str(&format!(" symref=HEAD:refs/heads/{}", branch));
    }
    caps.push_str(&format!(" agent={}", session.config().agent));
    Ok(caps)
}

/// Renders the pkt-line ref advertisement for `service=git-receive-pack`.
pub fn advertise_refs<P: Plumbing>(session: &RepoSession<P>) -> Result<Vec<u8>> {
    let mut writer = PktWriter::new();
    writer.write_text(&format!("# service={}", RECEIVE_PACK_SERVICE))?;
    writer.flush_pkt();

    let refs = session.refs()?;
    let caps = capability_line(session)?;
    match refs.first() {
        None => {
            writer.write_text(&format!(
                "{} capabilities^{{}}\0{}",
                ObjectId::ZERO,
                caps
            ))?;
        }
        Some((name, oid)) => {
            writer.write_text(&format!("{} {}\0{}", oid, name, caps))?;
            for (name, oid) in &refs[1..] {
                writer.write_text(&format!("{} {}", oid, name))?;
            }
        }
    }
    writer.flush_pkt();
    Ok(writer.into_bytes())
}

/// The `GET /HEAD` body, `None` when HEAD has no symbolic target.
pub fn head_symref<P: Plumbing>(session: &RepoSession<P>) -> Result<Option<String>> {
    let branch = session.plumbing().head_branch()?;
    Ok(branch.map(|b| format!("ref: refs/heads/{}\n", b)))
}

/// The dumb `GET /info/refs` body: `<oid>\t<ref>` lines sorted by name,
/// with a peeled line per annotated tag.
pub fn info_refs_dumb<P: Plumbing>(session: &RepoSession<P>) -> Result<String> {
    let refs = session.refs()?;
    let mut out = String::new();
    for (name, oid) in &refs {
        out.push_str(&format!("{}\t{}\n", oid, name));
        if name.starts_with("refs/tags/") {
            if let Some(target) = session.plumbing().peel_tag(name)? {
                out.push_str(&format!("{}\t{}^{{}}\n", target, name));
            }
        }
    }
    Ok(out)
}

struct ParsedRequest<'a> {
    commands: Vec<RefUpdate>,
    pack: Option<&'a [u8]>,
    error: Option<String>,
}

fn parse_request(body: &[u8]) -> ParsedRequest<'_> {
    let mut commands = Vec::new();
    let mut decoder = Decoder::new(body, 0);
    let mut flushed = false;
    while let Some(unit) = decoder.next() {
        match unit {
            Ok(PktLine::Data(payload)) => {
                match RefUpdate::parse(&payload, commands.is_empty()) {
                    Ok(command) => commands.push(command),
                    Err(e) => {
                        return ParsedRequest {
                            commands,
                            pack: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
            Ok(PktLine::Flush) => {
                flushed = true;
                break;
            }
            Ok(PktLine::Delimiter) => {}
            Err(e) => {
                return ParsedRequest {
                    commands,
                    pack: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
    if !flushed {
        return ParsedRequest {
            commands,
            pack: None,
            error: Some("request ended before flush".to_string()),
        };
    }

    let rest = &body[decoder.offset()..];
    if rest.is_empty() {
        // No objects were sent; pure deletions are valid.
        ParsedRequest {
            commands,
            pack: None,
            error: None,
        }
    } else if rest.starts_with(PACK_SIGNATURE) {
        ParsedRequest {
            commands,
            pack: Some(rest),
            error: None,
        }
    } else {
        ParsedRequest {
            commands,
            pack: None,
            error: Some("bytes after flush are not a packfile".to_string()),
        }
    }
}

/// Persists the pack through the chunk store and hands it to the plumbing
/// indexer. Returns the reason string on failure.
fn persist_and_index<P: Plumbing>(
    session: &RepoSession<P>,
    pack: &[u8],
) -> std::result::Result<String, String> {
    let digest = Sha1::digest(pack);
    let path = format!("objects/pack/pack-{}.pack", hex::encode(digest));
    write_with_parents(session.fs(), &path, pack).map_err(|e| e.to_string())?;
    session
        .plumbing()
        .index_pack(&path)
        .map_err(|e| e.to_string())?;
    Ok(path)
}

fn write_with_parents(fs: &ChunkFs, path: &str, data: &[u8]) -> rowgit_store::Result<()> {
    match fs.write(path, data, None) {
        // Create missing parents only on ENOENT; ENOTDIR must surface.
        Err(StoreError::NotFound(_)) => {
            let dir = rowgit_store::parent(path);
            let mut prefix = String::new();
            for part in dir.split('/') {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(part);
                match fs.mkdir(&prefix, None) {
                    Ok(()) | Err(StoreError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            fs.write(path, data, None)
        }
        other => other,
    }
}

fn apply_command<P: Plumbing>(session: &RepoSession<P>, command: &RefUpdate) -> RefUpdateResult {
    let name = command.name.clone();
    if !name.starts_with("refs/") {
        return RefUpdateResult::Ng {
            name,
            reason: "funny refname".to_string(),
        };
    }

    let current = match session.plumbing().resolve_ref(&name) {
        Ok(oid) => oid.unwrap_or(ObjectId::ZERO),
        Err(e) => {
            return RefUpdateResult::Ng {
                name,
                reason: e.to_string(),
            }
        }
    };
    // Optimistic equality check, not an ancestry walk: the ref must still
    // be where the client last saw it.
    if current != command.old {
        return RefUpdateResult::Ng {
            name,
            reason: "non-fast-forward".to_string(),
        };
    }

    let applied = if command.is_delete() {
        session.plumbing().delete_ref(&name)
    } else {
        session.plumbing().update_ref(&name, command.new)
    };
    match applied {
        Ok(()) => RefUpdateResult::Ok { name },
        Err(e) => RefUpdateResult::Ng {
            name,
            reason: e.to_string(),
        },
    }
}

/// Points HEAD at a just-created branch when it had nowhere to go before.
fn adopt_head<P: Plumbing>(
    session: &RepoSession<P>,
    commands: &[RefUpdate],
    results: &[RefUpdateResult],
) {
    let adopt = || -> std::result::Result<(), crate::PlumbingError> {
        let head_resolved = match session.plumbing().head_branch()? {
            Some(branch) => session
                .plumbing()
                .resolve_ref(&format!("refs/heads/{}", branch))?
                .is_some(),
            None => false,
        };
        if head_resolved {
            return Ok(());
        }

        let mut candidates = commands
            .iter()
            .zip(results)
            .filter(|(cmd, res)| {
                res.is_ok() && !cmd.is_delete() && cmd.name.starts_with("refs/heads/")
            })
            .map(|(cmd, _)| &cmd.name[..]);
        let default = format!("refs/heads/{}", DEFAULT_BRANCH);
        let chosen = match candidates.clone().find(|name| **name == default) {
            Some(name) => Some(name),
            None => candidates.next(),
        };
        if let Some(name) = chosen {
            let branch = &name["refs/heads/".len()..];
            session.plumbing().set_head_branch(branch)?;
            tracing::info!(branch = %branch, "pointed HEAD at pushed branch");
        }
        Ok(())
    };
    if let Err(e) = adopt() {
        tracing::warn!(error = %e, "could not adopt HEAD target");
    }
}

fn render_report(unpack_line: &str, results: &[RefUpdateResult]) -> Result<Vec<u8>> {
    let mut writer = PktWriter::new();
    write_report_line(
        &mut writer,
        &format!("unpack {}", clip(unpack_line, MAX_REASON_BYTES)),
    )?;
    for result in results {
        let line = match result {
            RefUpdateResult::Ok { name } => format!("ok {}", name),
            RefUpdateResult::Ng { name, reason } => {
                format!("ng {} {}", name, clip(reason, MAX_REASON_BYTES))
            }
        };
        write_report_line(&mut writer, &line)?;
    }
    writer.flush_pkt();
    Ok(writer.into_bytes())
}

fn write_report_line(writer: &mut PktWriter, line: &str) -> Result<()> {
    // Status lines must always frame; write_text appends the newline.
    writer.write_text(clip(line, MAX_PAYLOAD - 1))
}

fn reject_all(commands: &[RefUpdate], unpack_error: &str) -> Result<Vec<u8>> {
    let results: Vec<RefUpdateResult> = commands
        .iter()
        .map(|cmd| RefUpdateResult::Ng {
            name: cmd.name.clone(),
            reason: UNPACK_FAILED_REASON.to_string(),
        })
        .collect();
    render_report(unpack_error, &results)
}

/// Handles a `git-receive-pack` request body, returning the status report.
///
/// Ref commands are applied independently in input order; the only
/// all-or-nothing gate is pack ingestion.
pub fn receive_pack<P: Plumbing>(session: &RepoSession<P>, body: &[u8]) -> Result<Vec<u8>> {
    let parsed = parse_request(body);
    if let Some(error) = parsed.error {
        tracing::warn!(error = %error, "rejecting malformed push request");
        return reject_all(&parsed.commands, &format!("error {}", error));
    }

    if let Some(pack) = parsed.pack {
        if pack.len() as u64 > session.config().max_pack_bytes {
            tracing::warn!(
                size = pack.len(),
                limit = session.config().max_pack_bytes,
                "rejecting oversized packfile"
            );
            return reject_all(
                &parsed.commands,
                &format!(
                    "error pack exceeds maximum size of {} bytes",
                    session.config().max_pack_bytes
                ),
            );
        }
        match persist_and_index(session, pack) {
            Ok(path) => {
                tracing::debug!(path = %path, size = pack.len(), "packfile ingested");
            }
            Err(reason) => {
                tracing::warn!(error = %reason, "packfile ingestion failed");
                return reject_all(&parsed.commands, &format!("error {}", reason));
            }
        }
    }

    let results: Vec<RefUpdateResult> = parsed
        .commands
        .iter()
        .map(|cmd| {
            let result = apply_command(session, cmd);
            if let RefUpdateResult::Ng { name, reason } = &result {
                tracing::warn!(r#ref = %name, reason = %reason, "ref update rejected");
            }
            result
        })
        .collect();

    adopt_head(session, &parsed.commands, &results);

    let applied = results.iter().filter(|r| r.is_ok()).count();
    if applied > 0 {
        session.invalidate_refs();
    }
    tracing::info!(
        refs = results.len(),
        applied,
        "push processed"
    );
    debug_assert!(results
        .iter()
        .zip(&parsed.commands)
        .all(|(r, c)| r.name() == c.name));
    render_report("ok", &results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pktline::encode;
    use crate::refs::LooseRefs;
    use crate::PlumbingError;
    use rowgit_store::{FsConfig, SqliteStore};
    use std::collections::HashMap;

    /// Plumbing double: loose refs through the chunk store, recorded pack
    /// indexing, optional injected failures.
    struct TestPlumbing {
        refs: LooseRefs,
        peeled: HashMap<String, ObjectId>,
        indexed: Mutex<Vec<String>>,
        fail_index: bool,
    }

    impl TestPlumbing {
        fn new(fs: Arc<ChunkFs>) -> Self {
            Self {
                refs: LooseRefs::new(fs),
                peeled: HashMap::new(),
                indexed: Mutex::new(Vec::new()),
                fail_index: false,
            }
        }
    }

    impl Plumbing for TestPlumbing {
        fn list_refs(&self) -> std::result::Result<Vec<(String, ObjectId)>, PlumbingError> {
            self.refs.list()
        }

        fn resolve_ref(&self, name: &str) -> std::result::Result<Option<ObjectId>, PlumbingError> {
            self.refs.read(name)
        }

        fn peel_tag(&self, name: &str) -> std::result::Result<Option<ObjectId>, PlumbingError> {
            Ok(self.peeled.get(name).copied())
        }

        fn head_branch(&self) -> std::result::Result<Option<String>, PlumbingError> {
            self.refs.head_branch()
        }

        fn set_head_branch(&self, branch: &str) -> std::result::Result<(), PlumbingError> {
            self.refs.set_head_branch(branch)
        }

        fn update_ref(&self, name: &str, oid: ObjectId) -> std::result::Result<(), PlumbingError> {
            self.refs.write(name, oid)
        }

        fn delete_ref(&self, name: &str) -> std::result::Result<(), PlumbingError> {
            self.refs.delete(name)
        }

        fn index_pack(&self, pack_path: &str) -> std::result::Result<(), PlumbingError> {
            if self.fail_index {
                return Err(PlumbingError::new("bad pack header"));
            }
            self.indexed.lock().push(pack_path.to_string());
            Ok(())
        }
    }

    fn session() -> RepoSession<TestPlumbing> {
        session_with(|_| {})
    }

    fn session_with(
        tweak: impl FnOnce(&mut TestPlumbing),
    ) -> RepoSession<TestPlumbing> {
        let store = SqliteStore::open_in_memory().unwrap();
        let fs = Arc::new(ChunkFs::new(store, FsConfig::default()).unwrap());
        let mut plumbing = TestPlumbing::new(fs.clone());
        tweak(&mut plumbing);
        RepoSession::new(fs, plumbing, ProtocolConfig::default())
    }

    fn oid(byte: u8) -> ObjectId {
        ObjectId::from_bytes([byte; 20])
    }

    fn command_line(old: ObjectId, new: ObjectId, name: &str, caps: bool) -> Vec<u8> {
        let suffix = if caps { "\0report-status" } else { "" };
        encode(format!("{} {} {}{}\n", old, new, name, suffix).as_bytes()).unwrap()
    }

    fn push_body(lines: &[Vec<u8>], pack: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        for line in lines {
            body.extend_from_slice(line);
        }
        body.extend_from_slice(b"0000");
        if let Some(pack) = pack {
            body.extend_from_slice(pack);
        }
        body
    }

    fn report_lines(response: &[u8]) -> Vec<String> {
        assert!(response.ends_with(b"0000"));
        Decoder::new(response, 0)
            .map(|u| u.unwrap())
            .filter_map(|u| u.as_str().map(String::from))
            .collect()
    }

    #[test]
    fn test_advertise_empty_repo() {
        let session = session();
        let out = advertise_refs(&session).unwrap();

        let units: Vec<PktLine> = Decoder::new(&out, 0).map(|u| u.unwrap()).collect();
        assert_eq!(units.len(), 4);
        assert_eq!(units[0], PktLine::Data(b"# service=git-receive-pack\n".to_vec()));
        assert_eq!(units[1], PktLine::Flush);
        let line = units[2].as_str().unwrap();
        assert!(line.starts_with(
            "0000000000000000000000000000000000000000 capabilities^{}\0report-status delete-refs ofs-delta"
        ));
        assert!(line.contains(" agent=rowgit/"));
        assert_eq!(units[3], PktLine::Flush);
    }

    #[test]
    fn test_advertise_sorted_refs_with_symref() {
        let session = session();
        session.plumbing().update_ref("refs/heads/main", oid(1)).unwrap();
        session.plumbing().update_ref("refs/heads/dev", oid(2)).unwrap();
        session.plumbing().set_head_branch("main").unwrap();

        let out = advertise_refs(&session).unwrap();
        let lines: Vec<String> = Decoder::new(&out, 0)
            .map(|u| u.unwrap())
            .filter_map(|u| u.as_str().map(String::from))
            .collect();

        // Sorted by name: dev first, carrying capabilities.
        assert!(lines[1].starts_with(&format!("{} refs/heads/dev\0", oid(2))));
        assert!(lines[1].contains("symref=HEAD:refs/heads/main"));
        assert_eq!(lines[2], format!("{} refs/heads/main", oid(1)));
    }

    #[test]
    fn test_receive_pack_creates_ref() {
        let session = session();
        let body = push_body(
            &[command_line(ObjectId::ZERO, oid(1), "refs/heads/main", true)],
            Some(b"PACKfakecontents"),
        );

        let response = receive_pack(&session, &body).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&encode(b"unpack ok\n").unwrap());
        expected.extend_from_slice(&encode(b"ok refs/heads/main\n").unwrap());
        expected.extend_from_slice(b"0000");
        assert_eq!(response, expected);

        assert_eq!(
            session.plumbing().resolve_ref("refs/heads/main").unwrap(),
            Some(oid(1))
        );
        // HEAD was unresolved and adopts the pushed branch.
        assert_eq!(
            session.plumbing().head_branch().unwrap(),
            Some("main".to_string())
        );
        // The pack was persisted under objects/pack/ and handed to the indexer.
        let indexed = session.plumbing().indexed.lock().clone();
        assert_eq!(indexed.len(), 1);
        assert!(indexed[0].starts_with("objects/pack/pack-"));
        assert!(indexed[0].ends_with(".pack"));
        assert_eq!(session.fs().read(&indexed[0]).unwrap(), b"PACKfakecontents");
    }

    #[test]
    fn test_pure_deletion_needs_no_pack() {
        let session = session();
        session.plumbing().update_ref("refs/heads/gone", oid(3)).unwrap();

        let body = push_body(
            &[command_line(oid(3), ObjectId::ZERO, "refs/heads/gone", true)],
            None,
        );
        let response = receive_pack(&session, &body).unwrap();
        assert_eq!(
            report_lines(&response),
            vec!["unpack ok", "ok refs/heads/gone"]
        );
        assert!(session
            .plumbing()
            .resolve_ref("refs/heads/gone")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_stale_old_oid_is_rejected_independently() {
        let session = session();
        session.plumbing().update_ref("refs/heads/main", oid(1)).unwrap();

        let body = push_body(
            &[
                command_line(oid(9), oid(2), "refs/heads/main", true),
                command_line(ObjectId::ZERO, oid(5), "refs/heads/other", false),
            ],
            Some(b"PACKx"),
        );
        let response = receive_pack(&session, &body).unwrap();
        assert_eq!(
            report_lines(&response),
            vec![
                "unpack ok",
                "ng refs/heads/main non-fast-forward",
                "ok refs/heads/other",
            ]
        );
        // The rejected ref is untouched; the sibling applied.
        assert_eq!(
            session.plumbing().resolve_ref("refs/heads/main").unwrap(),
            Some(oid(1))
        );
        assert_eq!(
            session.plumbing().resolve_ref("refs/heads/other").unwrap(),
            Some(oid(5))
        );
    }

    #[test]
    fn test_create_over_existing_ref_is_rejected() {
        let session = session();
        session.plumbing().update_ref("refs/heads/main", oid(1)).unwrap();

        let body = push_body(
            &[command_line(ObjectId::ZERO, oid(2), "refs/heads/main", true)],
            None,
        );
        let response = receive_pack(&session, &body).unwrap();
        assert_eq!(
            report_lines(&response),
            vec!["unpack ok", "ng refs/heads/main non-fast-forward"]
        );
    }

    #[test]
    fn test_funny_refname() {
        let session = session();
        let body = push_body(
            &[command_line(ObjectId::ZERO, oid(1), "HEAD", true)],
            None,
        );
        let response = receive_pack(&session, &body).unwrap();
        assert_eq!(
            report_lines(&response),
            vec!["unpack ok", "ng HEAD funny refname"]
        );
    }

    #[test]
    fn test_oversized_pack_rejects_everything() {
        let store = SqliteStore::open_in_memory().unwrap();
        let fs = Arc::new(ChunkFs::new(store, FsConfig::default()).unwrap());
        let plumbing = TestPlumbing::new(fs.clone());
        let session = RepoSession::new(
            fs,
            plumbing,
            ProtocolConfig {
                max_pack_bytes: 8,
                ..ProtocolConfig::default()
            },
        );

        let body = push_body(
            &[command_line(ObjectId::ZERO, oid(1), "refs/heads/main", true)],
            Some(b"PACKwaytoolarge"),
        );
        let response = receive_pack(&session, &body).unwrap();
        let lines = report_lines(&response);
        assert!(lines[0].starts_with("unpack error pack exceeds"));
        assert_eq!(lines[1], "ng refs/heads/main unpack failed");
        // No ref was touched and nothing was indexed.
        assert!(session
            .plumbing()
            .resolve_ref("refs/heads/main")
            .unwrap()
            .is_none());
        assert!(session.plumbing().indexed.lock().is_empty());
    }

    #[test]
    fn test_index_failure_rejects_everything() {
        let session = session_with(|p| p.fail_index = true);
        let body = push_body(
            &[
                command_line(ObjectId::ZERO, oid(1), "refs/heads/main", true),
                command_line(ObjectId::ZERO, oid(2), "refs/heads/dev", false),
            ],
            Some(b"PACKbroken"),
        );
        let response = receive_pack(&session, &body).unwrap();
        assert_eq!(
            report_lines(&response),
            vec![
                "unpack error bad pack header",
                "ng refs/heads/main unpack failed",
                "ng refs/heads/dev unpack failed",
            ]
        );
        assert!(session
            .plumbing()
            .resolve_ref("refs/heads/main")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_malformed_body_reports_in_band() {
        let session = session();
        let response = receive_pack(&session, b"not pkt-lines at all").unwrap();
        let lines = report_lines(&response);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("unpack error"));
    }

    #[test]
    fn test_oversized_malformed_line_reports_in_band() {
        // A maximum-size garbage command line must not blow the report past
        // the pkt-line limit when its text is quoted in the unpack reason.
        let session = session();
        let mut body = encode(&vec![b'x'; MAX_PAYLOAD]).unwrap();
        body.extend_from_slice(b"0000");

        let response = receive_pack(&session, &body).unwrap();
        let lines = report_lines(&response);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("unpack error"));
        assert!(lines[0].len() < 1024);
    }

    #[test]
    fn test_trailing_garbage_is_not_a_pack() {
        let session = session();
        let body = push_body(
            &[command_line(ObjectId::ZERO, oid(1), "refs/heads/main", true)],
            Some(b"JUNKnotapack"),
        );
        let response = receive_pack(&session, &body).unwrap();
        assert_eq!(
            report_lines(&response),
            vec![
                "unpack error bytes after flush are not a packfile",
                "ng refs/heads/main unpack failed",
            ]
        );
    }

    #[test]
    fn test_head_adoption_prefers_main() {
        let session = session();
        let body = push_body(
            &[
                command_line(ObjectId::ZERO, oid(1), "refs/heads/zeta", true),
                command_line(ObjectId::ZERO, oid(2), "refs/heads/main", false),
            ],
            Some(b"PACKx"),
        );
        receive_pack(&session, &body).unwrap();
        assert_eq!(
            session.plumbing().head_branch().unwrap(),
            Some("main".to_string())
        );
    }

    #[test]
    fn test_head_adoption_falls_back_to_first_success() {
        let session = session();
        let body = push_body(
            &[command_line(ObjectId::ZERO, oid(1), "refs/heads/trunk", true)],
            Some(b"PACKx"),
        );
        receive_pack(&session, &body).unwrap();
        assert_eq!(
            session.plumbing().head_branch().unwrap(),
            Some("trunk".to_string())
        );
    }

    #[test]
    fn test_resolved_head_is_left_alone() {
        let session = session();
        session.plumbing().update_ref("refs/heads/main", oid(1)).unwrap();
        session.plumbing().set_head_branch("main").unwrap();

        let body = push_body(
            &[command_line(ObjectId::ZERO, oid(2), "refs/heads/other", true)],
            Some(b"PACKx"),
        );
        receive_pack(&session, &body).unwrap();
        assert_eq!(
            session.plumbing().head_branch().unwrap(),
            Some("main".to_string())
        );
    }

    #[test]
    fn test_push_invalidates_ref_cache() {
        let session = session();
        assert!(session.refs().unwrap().is_empty());

        let body = push_body(
            &[command_line(ObjectId::ZERO, oid(1), "refs/heads/main", true)],
            Some(b"PACKx"),
        );
        receive_pack(&session, &body).unwrap();

        let refs = session.refs().unwrap();
        assert_eq!(refs, vec![("refs/heads/main".to_string(), oid(1))]);
    }

    #[test]
    fn test_rejected_push_keeps_ref_cache() {
        let session = session();
        session.plumbing().update_ref("refs/heads/main", oid(1)).unwrap();
        let before = session.refs().unwrap();

        // A push where nothing applied must not drop the cache.
        let body = push_body(
            &[command_line(oid(9), oid(2), "refs/heads/main", true)],
            None,
        );
        receive_pack(&session, &body).unwrap();
        assert_eq!(session.refs().unwrap(), before);
    }

    #[test]
    fn test_info_refs_dumb_with_peeled_tag() {
        let session = session_with(|p| {
            p.peeled.insert("refs/tags/v1.0".to_string(), oid(7));
        });
        session.plumbing().update_ref("refs/heads/main", oid(1)).unwrap();
        session.plumbing().update_ref("refs/tags/v1.0", oid(2)).unwrap();

        let out = info_refs_dumb(&session).unwrap();
        assert_eq!(
            out,
            format!(
                "{}\trefs/heads/main\n{}\trefs/tags/v1.0\n{}\trefs/tags/v1.0^{{}}\n",
                oid(1),
                oid(2),
                oid(7)
            )
        );
    }

    #[test]
    fn test_head_symref_body() {
        let session = session();
        assert!(head_symref(&session).unwrap().is_none());

        session.plumbing().set_head_branch("main").unwrap();
        assert_eq!(
            head_symref(&session).unwrap(),
            Some("ref: refs/heads/main\n".to_string())
        );
    }
}
