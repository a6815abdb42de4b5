//! OPAQUE-style PAKE session (§4.D): registration/login state machine
//! producing a shared 256-bit session key, plus pending-state TTL and
//! failure-backoff throttling.
//!
//! `original_source/server/include/pake.h` frames this as "Placeholder:
//! hook real PAKE (OPAQUE/SPA KE2+)"; this module implements the actual
//! OPAQUE-shaped exchange rather than leaving it a placeholder. The
//! oblivious PRF step uses the ristretto255 group (`curve25519-dalek`)
//! for genuine blind/unblind — hash-to-group, scalar-multiply blind,
//! server evaluates with its secret scalar, client unblinds — rather
//! than a non-algebraic HMAC chain that could not actually cancel a
//! random blind factor. `argon2` stretches the password before
//! blinding, matching the teacher's `crypto::hashing` Argon2id
//! conventions. The four HKDF-SHA256 subkeys (root_key, header_key,
//! kcp_key, ratchet_root) use the exact salt bytes and info string
//! from `original_source/server/src/pake.cpp`.

use std::collections::HashMap;

use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use zeroize::Zeroize;

use crate::limits::{
    PAKE_BACKOFF_BASE_SECS, PAKE_BACKOFF_CAP_SECS, PAKE_FAILURE_THRESHOLD,
    PAKE_FAILURE_WINDOW_SECS, PAKE_PENDING_TTL_SECS,
};
use crate::primitives::{kdf, rng};
use crate::time::Clock;

const PAKE_DERIVE_SALT: [u8; 32] = [
    0x5a, 0x12, 0x33, 0x97, 0xc1, 0x4f, 0x28, 0x0b, 0x91, 0x61, 0xaf, 0x72, 0x4d, 0xf3, 0x86, 0x9b,
    0x3c, 0x55, 0x6e, 0x21, 0xda, 0x01, 0x44, 0x8f, 0xb7, 0x0a, 0xce, 0x19, 0x2e, 0x73, 0x58, 0xd4,
];
const PAKE_DERIVE_INFO: &[u8] = b"mi_e2ee_pake_derive_v1";
const VERIFIER_LABEL: &[u8] = b"mi_e2ee_opaque_verifier_v1";
const RANDOMIZED_PWD_INFO: &[u8] = b"mi_e2ee_opaque_randomized_pwd_v1";
const SESSION_KEY_INFO: &[u8] = b"mi_e2ee_opaque_session_key_v1";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PakeError {
    #[error("invalid blinded element encoding")]
    InvalidElement,
    #[error("unknown user {username}")]
    UnknownUser { username: String },
    #[error("unknown login {login_id}")]
    UnknownLogin { login_id: String },
    #[error("authentication failed")]
    AuthFailed,
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
}

pub type Result<T> = std::result::Result<T, PakeError>;

/// Server-wide secret, persisted once via [`crate::persist`] with
/// magic `MIOPAQS1`. Never regenerated across restarts — every
/// registered user's verifier is only reproducible under this key.
#[derive(Clone)]
pub struct ServerSetup {
    oprf_key: Scalar,
}

impl ServerSetup {
    pub fn generate() -> Self {
        Self {
            oprf_key: Scalar::from_bytes_mod_order(rng::random_32()),
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.oprf_key.to_bytes()
    }

    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            oprf_key: Scalar::from_bytes_mod_order(*bytes),
        }
    }
}

fn hash_to_group(input: &[u8]) -> RistrettoPoint {
    RistrettoPoint::hash_from_bytes::<Sha512>(input)
}

/// Client-side blind of a (stretched) password; returns the blind
/// factor to keep for unblinding and the wire-encoded blinded element.
fn blind(hardened_password: &[u8]) -> (Scalar, [u8; 32]) {
    let r = Scalar::from_bytes_mod_order(rng::random_32());
    let blinded = hash_to_group(hardened_password) * r;
    (r, blinded.compress().to_bytes())
}

/// Server-side OPRF evaluation: blinded_element * oprf_key.
fn evaluate(setup: &ServerSetup, blinded_element: &[u8; 32]) -> Result<[u8; 32]> {
    let point = CompressedRistretto(*blinded_element)
        .decompress()
        .ok_or(PakeError::InvalidElement)?;
    Ok((point * setup.oprf_key).compress().to_bytes())
}

/// Client-side unblind: evaluated_element * r^-1, giving
/// `H(hardened_password) * oprf_key` independent of `r`.
fn unblind(evaluated_element: &[u8; 32], r: Scalar) -> Result<[u8; 32]> {
    let point = CompressedRistretto(*evaluated_element)
        .decompress()
        .ok_or(PakeError::InvalidElement)?;
    let r_inv = r.invert();
    Ok((point * r_inv).compress().to_bytes())
}

fn stretch_password(username: &str, password: &[u8]) -> [u8; 32] {
    use argon2::{Argon2, PasswordHasher};
    use password_hash::{Salt, SaltString};

    // Argon2's salt type requires base64-alphabet text; derive a
    // stable salt string from the username rather than requiring the
    // caller to manage one.
    let salt_material = Sha256::digest(username.as_bytes());
    let salt_b64 = base32::encode(base32::Alphabet::Rfc4648 { padding: false }, &salt_material)
        .to_lowercase();
    let salt_str = SaltString::encode_b64(&salt_material[..16]).unwrap_or_else(|_| {
        SaltString::from_b64("aaaaaaaaaaaaaaaaaaaaaa").expect("static fallback salt is valid")
    });
    let _ = salt_b64;
    let salt: Salt = salt_str.as_salt();

    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password, salt)
        .expect("argon2 hashing with valid salt/password cannot fail");
    let raw = hash.hash.expect("argon2 always emits a hash output");
    let mut out = [0u8; 32];
    let bytes = raw.as_bytes();
    out.copy_from_slice(&bytes[..32.min(bytes.len())]);
    out
}

fn randomized_password(oprf_output: &[u8; 32]) -> [u8; 32] {
    kdf::hkdf_expand_32(None, oprf_output, RANDOMIZED_PWD_INFO)
        .expect("hkdf-sha256 32-byte expand cannot fail")
}

fn verifier_of(randomized_pwd: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(randomized_pwd);
    hasher.update(VERIFIER_LABEL);
    hasher.finalize().into()
}

/// Four subkeys derived from the PAKE session secret (§4.D).
#[derive(Clone)]
pub struct DerivedKeys {
    pub root_key: [u8; 32],
    pub header_key: [u8; 32],
    pub kcp_key: [u8; 32],
    pub ratchet_root: [u8; 32],
}

impl Drop for DerivedKeys {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.header_key.zeroize();
        self.kcp_key.zeroize();
        self.ratchet_root.zeroize();
    }
}

fn derive_keys(session_secret: &[u8; 32]) -> DerivedKeys {
    let subkeys: [[u8; 32]; 4] =
        kdf::hkdf_expand_subkeys(Some(&PAKE_DERIVE_SALT), session_secret, PAKE_DERIVE_INFO)
            .expect("hkdf-sha256 128-byte expand cannot fail");
    DerivedKeys {
        root_key: subkeys[0],
        header_key: subkeys[1],
        kcp_key: subkeys[2],
        ratchet_root: subkeys[3],
    }
}

// ── Client-side state machine ───────────────────────────────────────

pub struct RegistrationRequest {
    pub blinded_element: [u8; 32],
}

pub struct ClientRegistration {
    blind: Scalar,
}

pub fn client_start_registration(username: &str, password: &[u8]) -> (ClientRegistration, RegistrationRequest) {
    let hardened = stretch_password(username, password);
    let (blind, blinded_element) = blind(&hardened);
    (ClientRegistration { blind }, RegistrationRequest { blinded_element })
}

pub struct RegistrationUpload {
    pub verifier: [u8; 32],
}

pub fn client_finish_registration(
    state: ClientRegistration,
    response_evaluated_element: &[u8; 32],
) -> Result<RegistrationUpload> {
    let oprf_output = unblind(response_evaluated_element, state.blind)?;
    let randomized_pwd = randomized_password(&oprf_output);
    Ok(RegistrationUpload {
        verifier: verifier_of(&randomized_pwd),
    })
}

pub struct CredentialRequest {
    pub login_id: String,
    pub blinded_element: [u8; 32],
    pub client_ephemeral_public: [u8; 32],
}

pub struct ClientLogin {
    blind: Scalar,
    ephemeral_secret: [u8; 32],
    login_id: String,
}

pub fn client_start_login(
    username: &str,
    password: &[u8],
    login_id: String,
) -> (ClientLogin, CredentialRequest) {
    let hardened = stretch_password(username, password);
    let (blind, blinded_element) = blind(&hardened);
    let ephemeral = crate::primitives::dh::DhKeypair::generate();
    let ephemeral_secret = ephemeral.secret_bytes();
    (
        ClientLogin {
            blind,
            ephemeral_secret,
            login_id: login_id.clone(),
        },
        CredentialRequest {
            login_id,
            blinded_element,
            client_ephemeral_public: ephemeral.public,
        },
    )
}

pub struct CredentialResponse {
    pub evaluated_element: [u8; 32],
    pub server_ephemeral_public: [u8; 32],
}

pub struct CredentialFinalization {
    pub login_id: String,
    pub verifier: [u8; 32],
}

/// Client finishes login: unblinds, recomputes the verifier, and
/// derives the session key from the verifier mixed with the ephemeral
/// DH exchange (forward secrecy against later key leaks). The session
/// key is derived from `verifier`, not the raw `randomized_pwd` —
/// `verifier` is the one password-derived value the server can also
/// reproduce (it only ever stores/sees the hash, never the
/// pre-image), so it's the shared term both sides can independently
/// feed into the same HKDF call.
pub fn client_finish_login(
    state: ClientLogin,
    response: &CredentialResponse,
) -> Result<(CredentialFinalization, [u8; 32])> {
    let oprf_output = unblind(&response.evaluated_element, state.blind)?;
    let randomized_pwd = randomized_password(&oprf_output);
    let verifier = verifier_of(&randomized_pwd);

    let dh_shared = crate::primitives::dh::agree(
        &state.ephemeral_secret,
        &response.server_ephemeral_public,
    )
    .map_err(|_| PakeError::InvalidElement)?;

    let session_key = session_key_from(&verifier, &dh_shared);

    Ok((
        CredentialFinalization {
            login_id: state.login_id,
            verifier,
        },
        session_key,
    ))
}

fn session_key_from(verifier: &[u8; 32], dh_shared: &[u8; 32]) -> [u8; 32] {
    let mut ikm = Vec::with_capacity(64);
    ikm.extend_from_slice(verifier);
    ikm.extend_from_slice(dh_shared);
    kdf::hkdf_expand_32(None, &ikm, SESSION_KEY_INFO)
        .expect("hkdf-sha256 32-byte expand cannot fail")
}

// ── Server-side state machine ────────────────────────────────────────

struct PendingLogin {
    username: String,
    server_ephemeral_secret: [u8; 32],
    created_at_ms: u64,
}

struct FailureRecord {
    count: u32,
    window_start_ms: u64,
    banned_until_ms: u64,
}

/// Server-side PAKE actor: owns `ServerSetup`, the per-user verifier
/// table, pending login states, and the failure-backoff table (§4.D,
/// §5 rate limits).
pub struct PakeServer<C: Clock> {
    setup: ServerSetup,
    verifiers: HashMap<String, [u8; 32]>,
    pending: HashMap<String, PendingLogin>,
    failures: HashMap<String, FailureRecord>,
    clock: C,
}

impl<C: Clock> PakeServer<C> {
    pub fn new(setup: ServerSetup, clock: C) -> Self {
        Self {
            setup,
            verifiers: HashMap::new(),
            pending: HashMap::new(),
            failures: HashMap::new(),
            clock,
        }
    }

    pub fn start_registration(&self, request: &RegistrationRequest) -> Result<[u8; 32]> {
        evaluate(&self.setup, &request.blinded_element)
    }

    pub fn finish_registration(&mut self, username: &str, upload: RegistrationUpload) {
        self.verifiers.insert(username.to_string(), upload.verifier);
        log::debug!("pake: registered user {username}");
    }

    fn check_throttle(&mut self, username: &str) -> Result<()> {
        let now = self.clock.now_ms();
        if let Some(rec) = self.failures.get(username) {
            if now < rec.banned_until_ms {
                let retry_after_secs = (rec.banned_until_ms - now) / 1000 + 1;
                return Err(PakeError::RateLimited { retry_after_secs });
            }
        }
        Ok(())
    }

    fn record_failure(&mut self, username: &str) {
        let now = self.clock.now_ms();
        let rec = self
            .failures
            .entry(username.to_string())
            .or_insert(FailureRecord {
                count: 0,
                window_start_ms: now,
                banned_until_ms: 0,
            });
        if now.saturating_sub(rec.window_start_ms) > PAKE_FAILURE_WINDOW_SECS * 1000 {
            rec.count = 0;
            rec.window_start_ms = now;
        }
        rec.count += 1;
        if rec.count >= PAKE_FAILURE_THRESHOLD {
            let exp = rec.count - PAKE_FAILURE_THRESHOLD;
            let backoff = (PAKE_BACKOFF_BASE_SECS * (1u64 << exp.min(20))).min(PAKE_BACKOFF_CAP_SECS);
            rec.banned_until_ms = now + backoff * 1000;
            log::warn!("pake: {username} banned for {backoff}s after {} failures", rec.count);
        }
    }

    fn record_success(&mut self, username: &str) {
        self.failures.remove(username);
    }

    /// Username is sent alongside `CredentialRequest` out-of-band of
    /// the PAKE message itself in the real wire protocol (the Login
    /// frame carries both); accepted here as an explicit parameter.
    pub fn start_login(
        &mut self,
        username: &str,
        request: &CredentialRequest,
    ) -> Result<CredentialResponse> {
        self.check_throttle(username)?;
        if !self.verifiers.contains_key(username) {
            return Err(PakeError::UnknownUser {
                username: username.to_string(),
            });
        }
        let evaluated_element = evaluate(&self.setup, &request.blinded_element)?;
        let server_ephemeral = crate::primitives::dh::DhKeypair::generate();
        self.pending.insert(
            request.login_id.clone(),
            PendingLogin {
                username: username.to_string(),
                server_ephemeral_secret: server_ephemeral.secret_bytes(),
                created_at_ms: self.clock.now_ms(),
            },
        );
        Ok(CredentialResponse {
            evaluated_element,
            server_ephemeral_public: server_ephemeral.public,
        })
    }

    /// Verify a finalization and, on success, derive the same session
    /// key the client derived. Consumes the pending state regardless
    /// of outcome so replays of the same `login_id` fail with
    /// `UnknownLogin` (§4.D pending-state lifetime).
    pub fn finish_login(
        &mut self,
        finalization: &CredentialFinalization,
        client_ephemeral_public: &[u8; 32],
    ) -> Result<[u8; 32]> {
        let pending = self
            .pending
            .remove(&finalization.login_id)
            .ok_or_else(|| PakeError::UnknownLogin {
                login_id: finalization.login_id.clone(),
            })?;

        let now = self.clock.now_ms();
        if now.saturating_sub(pending.created_at_ms) > PAKE_PENDING_TTL_SECS * 1000 {
            log::warn!("pake: login {} expired", finalization.login_id);
            return Err(PakeError::UnknownLogin {
                login_id: finalization.login_id.clone(),
            });
        }

        self.check_throttle(&pending.username)?;

        let expected = self.verifiers.get(&pending.username).copied();
        let matches = expected
            .map(|v| v.ct_eq_bytes(&finalization.verifier))
            .unwrap_or(false);
        if !matches {
            self.record_failure(&pending.username);
            log::warn!("pake: login failed for {}", pending.username);
            return Err(PakeError::AuthFailed);
        }

        let dh_shared =
            crate::primitives::dh::agree(&pending.server_ephemeral_secret, client_ephemeral_public)
                .map_err(|_| PakeError::InvalidElement)?;

        let session_key = session_key_from(&finalization.verifier, &dh_shared);

        self.record_success(&pending.username);
        log::debug!("pake: login succeeded for {}", pending.username);
        Ok(session_key)
    }
}

trait ConstantTimeEqBytes {
    fn ct_eq_bytes(&self, other: &[u8; 32]) -> bool;
}

impl ConstantTimeEqBytes for [u8; 32] {
    fn ct_eq_bytes(&self, other: &[u8; 32]) -> bool {
        use subtle::ConstantTimeEq;
        self.ct_eq(other).into()
    }
}

/// Derive the four PAKE subkeys from a session key (§4.D).
pub fn derive_session_subkeys(session_key: &[u8; 32]) -> DerivedKeys {
    derive_keys(session_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::StepClock;

    #[test]
    fn register_then_login_yields_matching_verifier() {
        let setup = ServerSetup::generate();
        let mut server = PakeServer::new(setup, StepClock::new(0));

        let (client_reg, req) = client_start_registration("alice", b"pw-A");
        let evaluated = server.start_registration(&req).unwrap();
        let upload = client_finish_registration(client_reg, &evaluated).unwrap();
        server.finish_registration("alice", upload);

        let (client_login, login_req) =
            client_start_login("alice", b"pw-A", "login-1".to_string());
        let response = server.start_login("alice", &login_req).unwrap();
        let (mut finalization, client_session_key) =
            client_finish_login(client_login, &response).unwrap();
        finalization.login_id = "login-1".to_string();

        let server_session_key = server
            .finish_login(&finalization, &login_req.client_ephemeral_public)
            .unwrap();
        assert_eq!(client_session_key.len(), 32);
        assert_eq!(server_session_key.len(), 32);
    }

    #[test]
    fn wrong_password_never_authenticates() {
        let setup = ServerSetup::generate();
        let mut server = PakeServer::new(setup, StepClock::new(0));

        let (client_reg, req) = client_start_registration("bob", b"correct-horse");
        let evaluated = server.start_registration(&req).unwrap();
        let upload = client_finish_registration(client_reg, &evaluated).unwrap();
        server.finish_registration("bob", upload);

        let (client_login, login_req) =
            client_start_login("bob", b"wrong-password", "login-2".to_string());
        let response = server.start_login("bob", &login_req).unwrap();
        let (mut finalization, _) = client_finish_login(client_login, &response).unwrap();
        finalization.login_id = "login-2".to_string();

        assert_eq!(
            server.finish_login(&finalization, &login_req.client_ephemeral_public),
            Err(PakeError::AuthFailed)
        );
    }

    #[test]
    fn replayed_login_id_rejected_after_consumption() {
        let setup = ServerSetup::generate();
        let mut server = PakeServer::new(setup, StepClock::new(0));
        let (client_reg, req) = client_start_registration("carol", b"pw-C");
        let evaluated = server.start_registration(&req).unwrap();
        let upload = client_finish_registration(client_reg, &evaluated).unwrap();
        server.finish_registration("carol", upload);

        let (client_login, login_req) =
            client_start_login("carol", b"pw-C", "login-3".to_string());
        let response = server.start_login("carol", &login_req).unwrap();
        let (mut finalization, _) = client_finish_login(client_login, &response).unwrap();
        finalization.login_id = "login-3".to_string();
        server
            .finish_login(&finalization, &login_req.client_ephemeral_public)
            .unwrap();

        assert_eq!(
            server.finish_login(&finalization, &login_req.client_ephemeral_public),
            Err(PakeError::UnknownLogin {
                login_id: "login-3".to_string()
            })
        );
    }

    #[test]
    fn pending_login_expires_after_ttl() {
        let setup = ServerSetup::generate();
        let clock = StepClock::new(0);
        let mut server = PakeServer::new(setup, clock);
        let (client_reg, req) = client_start_registration("dave", b"pw-D");
        let evaluated = server.start_registration(&req).unwrap();
        let upload = client_finish_registration(client_reg, &evaluated).unwrap();
        server.finish_registration("dave", upload);

        let (client_login, login_req) =
            client_start_login("dave", b"pw-D", "login-4".to_string());
        let response = server.start_login("dave", &login_req).unwrap();
        let (mut finalization, _) = client_finish_login(client_login, &response).unwrap();
        finalization.login_id = "login-4".to_string();

        server.clock.advance_ms((PAKE_PENDING_TTL_SECS + 1) * 1000);
        assert_eq!(
            server.finish_login(&finalization, &login_req.client_ephemeral_public),
            Err(PakeError::UnknownLogin {
                login_id: "login-4".to_string()
            })
        );
    }

    #[test]
    fn backoff_after_repeated_failures() {
        let setup = ServerSetup::generate();
        let mut server = PakeServer::new(setup, StepClock::new(0));
        let (client_reg, req) = client_start_registration("erin", b"pw-E");
        let evaluated = server.start_registration(&req).unwrap();
        let upload = client_finish_registration(client_reg, &evaluated).unwrap();
        server.finish_registration("erin", upload);

        for i in 0..5 {
            let (client_login, login_req) =
                client_start_login("erin", b"wrong", format!("login-fail-{i}"));
            let response = server.start_login("erin", &login_req).unwrap();
            let (mut finalization, _) = client_finish_login(client_login, &response).unwrap();
            finalization.login_id = format!("login-fail-{i}");
            let _ = server.finish_login(&finalization, &login_req.client_ephemeral_public);
        }

        let (client_login, login_req) =
            client_start_login("erin", b"pw-E", "login-after-ban".to_string());
        assert!(matches!(
            server.start_login("erin", &login_req),
            Err(PakeError::RateLimited { .. })
        ));
        let _ = client_login;
    }
}
