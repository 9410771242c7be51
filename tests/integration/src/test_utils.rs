//! Shared fixtures for the end-to-end tests

use std::sync::{Arc, Once};
use trustproto_core::{HashChainLedger, ProtocolConfig, MS_PER_DAY};
use trustproto_crypto::SignatureService;
use trustproto_domain::{
    ConfidenceComponents, ConsentRecord, HumanIdentityRecord, InMemoryDeclarationStore,
    InMemoryIdentityRegistry, TrustArticles, TrustDeclaration, VerificationStatus, Vote,
};
use trustproto_trust_mesh::{
    Caller, InMemoryBridgeStore, NewDeclaration, Role, TrustProtocol,
};

static LOGGING: Once = Once::new();

/// Route tracing output through the test harness once per process.
pub fn init_test_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
            .with_test_writer()
            .try_init();
    });
}

pub fn admin() -> Caller {
    Caller::new("admin", Role::Admin)
}

pub fn user(id: &str) -> Caller {
    Caller::new(id, Role::User)
}

pub fn validator(id: &str) -> Caller {
    Caller::new(id, Role::ValidatorAgent)
}

pub fn days(n: u64) -> u64 {
    n * MS_PER_DAY
}

/// Verified human whose trust score is 0.9.
pub fn verified_human(user_id: &str) -> HumanIdentityRecord {
    HumanIdentityRecord {
        user_id: user_id.to_string(),
        status: VerificationStatus::Verified,
        confidence: ConfidenceComponents {
            base_confidence: 0.8,
            document_verified: true,
            biometric_verified: true,
            liveness_verified: true,
            multi_factor: true,
        },
        consent: ConsentRecord::all_granted(),
        verified_at: Some(trustproto_core::now_ms()),
        expires_at: None,
    }
}

/// A protocol instance over in-memory stores, with handles to the stores
/// so tests can seed and inspect them directly.
pub struct TestHarness {
    pub protocol: TrustProtocol,
    pub identities: Arc<InMemoryIdentityRegistry>,
    pub declarations: Arc<InMemoryDeclarationStore>,
    pub bridge_store: Arc<InMemoryBridgeStore>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(ProtocolConfig::default())
    }

    pub fn with_config(config: ProtocolConfig) -> Self {
        init_test_logging();
        let identities = Arc::new(InMemoryIdentityRegistry::new());
        let declarations = Arc::new(InMemoryDeclarationStore::new());
        let bridge_store = Arc::new(InMemoryBridgeStore::new());
        let ledger = HashChainLedger::open_in_memory().expect("in-memory ledger");
        let signer = SignatureService::in_memory(&config.signing);

        let protocol = TrustProtocol::new(
            &config,
            Arc::new(ledger),
            Arc::new(signer),
            declarations.clone(),
            identities.clone(),
            bridge_store.clone(),
        );
        Self {
            protocol,
            identities,
            declarations,
            bridge_store,
        }
    }

    /// Create and sign a fully compliant declaration owned by `owner`.
    pub fn signed_declaration(&self, owner: &Caller, agent_id: &str) -> TrustDeclaration {
        let decl = self
            .protocol
            .create_declaration(
                owner,
                NewDeclaration {
                    agent_id: agent_id.to_string(),
                    agent_name: format!("{agent_id} assistant"),
                    trust_articles: TrustArticles::uniform(true),
                    owner_id: None,
                },
            )
            .expect("create declaration");
        self.protocol
            .sign_declaration(owner, &decl.id, agent_id)
            .expect("sign declaration")
    }

    /// Give `validator_id` enough signed history and admit it.
    pub fn admitted_validator(&self, validator_id: &str) -> Caller {
        let owner = user(&format!("owner-of-{validator_id}"));
        for _ in 0..3 {
            self.signed_declaration(&owner, validator_id);
        }
        self.protocol
            .admit_validator(&admin(), validator_id)
            .expect("admit validator");
        validator(validator_id)
    }

    /// A signed declaration for `agent_id` approved by a fresh validator.
    pub fn endorsed_agent(&self, agent_id: &str) -> TrustDeclaration {
        let owner = user(&format!("owner-of-{agent_id}"));
        let decl = self.signed_declaration(&owner, agent_id);
        let voter = self.admitted_validator(&format!("validator-for-{agent_id}"));

        let vote = Vote::new(voter.id.clone(), true, trustproto_core::now_ms());
        self.protocol
            .submit_vote(&voter, &decl.id, vote.clone())
            .expect("submit vote");
        let result = self
            .protocol
            .calculate_consensus(&voter, &decl.id, &[vote])
            .expect("calculate consensus");
        assert!(result.reached);

        self.protocol
            .get_declaration(&decl.id)
            .expect("endorsed declaration")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
