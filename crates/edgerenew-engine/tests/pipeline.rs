//! End-to-end pipeline tests
//!
//! Runs full renewal chains against SQLite in-memory stores, the in-memory
//! provider implementations, and a mocked certificate authority. The queue
//! is drained inline with a zero retry interval so every retry path is
//! deterministic.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, NotSet, Set};

use edgerenew_acme::{
    AcmeError, ChallengeKind, ChallengeSpec, CreatedOrder, FinalizedOrder, MockDirectoryClient,
    RegisteredAccount, SerializedChallenge, SerializedOrder,
};
use edgerenew_cloud::memory::{
    InMemoryCertificateStore, InMemoryDistributionApi, InMemoryListenerApi, InMemoryObjectStore,
};
use edgerenew_cloud::{
    AwsPartition, CdnAdapter, LbAdapter, ListenerApi, PropagationSettings, ProviderTarget,
};
use edgerenew_db::entities::{certificate, challenge, operation, route};
use edgerenew_db::{connect, migrate, queries, FieldCipher, RouteType, Store, Stores};
use edgerenew_engine::runner::drain_queue;
use edgerenew_engine::scheduler::{backport_sweep, renewal_sweep};
use edgerenew_engine::{
    Alerter, EngineConfig, PipelineContext, QueuedUnit, StepName, TaskQueue,
};

const CREDENTIALS: &str = r#"{"fake":"credentials"}"#;
const ORDER_URL: &str = "https://ca.example/order/1";

struct CountingAlerter {
    alerts: AtomicU32,
}

#[async_trait]
impl Alerter for CountingAlerter {
    async fn send_failed_operation_alert(
        &self,
        _operation_id: i32,
        _route_id: &str,
        _route_type: RouteType,
    ) {
        self.alerts.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    ctx: Arc<PipelineContext>,
    queue: TaskQueue,
    rx: tokio::sync::mpsc::UnboundedReceiver<QueuedUnit>,
    cert_store: Arc<InMemoryCertificateStore>,
    object_store: Arc<InMemoryObjectStore>,
    distributions: Arc<InMemoryDistributionApi>,
    listeners: Arc<InMemoryListenerApi>,
    alerter: Arc<CountingAlerter>,
}

impl Harness {
    async fn new(directory: MockDirectoryClient) -> Self {
        let cdn_db = connect("sqlite::memory:").await.expect("connect cdn");
        migrate(&cdn_db).await.expect("migrate cdn");
        let lb_db = connect("sqlite::memory:").await.expect("connect lb");
        migrate(&lb_db).await.expect("migrate lb");

        let stores = Stores::new(
            Store {
                db: cdn_db,
                cipher: FieldCipher::new("cdn-test", [1u8; 32]),
            },
            Store {
                db: lb_db,
                cipher: FieldCipher::new("lb-test", [2u8; 32]),
            },
        );

        let cert_store = Arc::new(InMemoryCertificateStore::new());
        let object_store = Arc::new(InMemoryObjectStore::new());
        let distributions = Arc::new(InMemoryDistributionApi::new());
        let listeners = Arc::new(InMemoryListenerApi::new());

        let propagation = PropagationSettings {
            delay: Duration::from_millis(1),
            max_attempts: 3,
        };

        let cdn_adapter = Arc::new(CdnAdapter::new(
            ProviderTarget::new(AwsPartition::Commercial, "us-east-1", "cdn-bucket", "/cdn/"),
            cert_store.clone(),
            object_store.clone(),
            distributions.clone(),
            propagation,
        ));
        let lb_adapter = Arc::new(LbAdapter::new(
            ProviderTarget::new(AwsPartition::GovCloud, "us-gov-west-1", "lb-bucket", "/lb/"),
            cert_store.clone(),
            object_store.clone(),
            listeners.clone(),
            propagation,
        ));

        let alerter = Arc::new(CountingAlerter {
            alerts: AtomicU32::new(0),
        });

        let config = EngineConfig {
            acme_poll_timeout: Duration::from_secs(1),
            retry_delay: Duration::ZERO,
            object_store_propagation: Duration::ZERO,
            ..EngineConfig::default()
        };

        let ctx = Arc::new(PipelineContext {
            stores,
            directory: Arc::new(directory),
            cdn_adapter,
            lb_adapter,
            alerter: alerter.clone(),
            config,
        });

        let (queue, rx) = TaskQueue::new();

        Self {
            ctx,
            queue,
            rx,
            cert_store,
            object_store,
            distributions,
            listeners,
            alerter,
        }
    }

    fn db(&self, route_type: RouteType) -> &sea_orm::DatabaseConnection {
        &self.ctx.stores.for_type(route_type).db
    }

    async fn drain(&mut self) {
        drain_queue(&self.ctx, &self.queue, &mut self.rx).await;
    }

    async fn seed_route(
        &self,
        route_type: RouteType,
        instance_id: &str,
        resource_ref: &str,
        domains: &[&str],
    ) {
        route::ActiveModel {
            instance_id: Set(instance_id.to_string()),
            state: Set(route::RouteState::Provisioned),
            domains: Set(route::encode_domains(
                &domains.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
            )),
            resource_ref: Set(Some(resource_ref.to_string())),
            acme_account_id: Set(None),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.db(route_type))
        .await
        .expect("insert route");
    }

    /// Link an existing certificate with store identifiers and an expiry to
    /// a route, and mirror it into the provider state.
    async fn seed_current_certificate(
        &self,
        route_type: RouteType,
        instance_id: &str,
        resource_ref: &str,
        expires_in_days: i64,
    ) -> certificate::Model {
        let name = format!("{instance_id}-2026-05-01-1");
        let metadata = self.cert_store.seed(&name, expires_in_days);

        match route_type {
            RouteType::Cdn => {
                self.distributions.seed(resource_ref, Some(&metadata.id));
            }
            RouteType::Lb => {
                self.listeners.seed(resource_ref, &[metadata.arn.as_str()]);
            }
        }

        certificate::ActiveModel {
            id: NotSet,
            route_id: Set(Some(instance_id.to_string())),
            private_key_pem: Set(None),
            csr_pem: Set(None),
            order_json: Set(None),
            leaf_pem: Set(None),
            fullchain_pem: Set(None),
            expires: Set(Some(Utc::now() + chrono::Duration::days(expires_in_days))),
            iam_server_certificate_id: Set(Some(metadata.id)),
            iam_server_certificate_name: Set(Some(metadata.name)),
            iam_server_certificate_arn: Set(Some(metadata.arn)),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(self.db(route_type))
        .await
        .expect("insert certificate")
    }

    async fn operations(&self, route_type: RouteType) -> Vec<operation::Model> {
        operation::Entity::find()
            .all(self.db(route_type))
            .await
            .expect("list operations")
    }

    fn alert_count(&self) -> u32 {
        self.alerter.alerts.load(Ordering::SeqCst)
    }
}

fn test_bundle() -> String {
    let leaf = {
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["www.example.gov".to_string()]).unwrap();
        params.self_signed(&key).unwrap().pem()
    };
    let intermediate = {
        let key = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(vec!["ca.example.gov".to_string()]).unwrap();
        params.self_signed(&key).unwrap().pem()
    };
    format!("{leaf}{intermediate}")
}

fn registered_account() -> RegisteredAccount {
    RegisteredAccount {
        credentials_json: CREDENTIALS.to_string(),
        uri: "https://ca.example/acct/1".to_string(),
        registration_json: r#"{"status":"valid"}"#.to_string(),
    }
}

fn created_order(domains: &[String], order_url: &str) -> CreatedOrder {
    let challenges = domains
        .iter()
        .enumerate()
        .map(|(i, domain)| ChallengeSpec {
            domain: domain.clone(),
            kind: ChallengeKind::Http01,
            validation_path: format!("/.well-known/acme-challenge/token-{i}"),
            validation_contents: format!("token-{i}.thumbprint"),
            body: SerializedChallenge {
                url: format!("{order_url}/chall/{i}"),
                token: format!("token-{i}"),
                kind: ChallengeKind::Http01,
                status: "pending".to_string(),
            },
        })
        .collect();

    CreatedOrder {
        order: SerializedOrder {
            url: order_url.to_string(),
            status: "pending".to_string(),
            domains: domains.to_vec(),
        },
        challenges,
    }
}

/// A directory mock that walks the happy path for any number of orders.
fn happy_directory(bundle: String) -> MockDirectoryClient {
    let mut directory = MockDirectoryClient::new();
    directory
        .expect_register_account()
        .returning(|_| Ok(registered_account()));
    directory
        .expect_new_order()
        .returning(|_, domains, _| Ok(created_order(domains, ORDER_URL)));
    directory.expect_answer_challenge().returning(|_, _, _| Ok(()));
    directory
        .expect_poll_and_finalize()
        .returning(move |_, order_url, _, _| {
            Ok(FinalizedOrder {
                fullchain_pem: bundle.clone(),
                order: SerializedOrder {
                    url: order_url.to_string(),
                    status: "valid".to_string(),
                    domains: Vec::new(),
                },
            })
        });
    directory
}

#[tokio::test]
async fn full_renewal_chain_for_lb_route() {
    let mut harness = Harness::new(happy_directory(test_bundle())).await;

    harness
        .seed_route(RouteType::Lb, "inst-lb", "arn:listener/1", &["www.example.gov"])
        .await;
    let old = harness
        .seed_current_certificate(RouteType::Lb, "inst-lb", "arn:listener/1", 10)
        .await;

    let enqueued = renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    assert_eq!(enqueued, 1);

    harness.drain().await;

    // operation reached the terminal success state
    let ops = harness.operations(RouteType::Lb).await;
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].state, operation::OperationState::Succeeded);

    // the new certificate is fully issued, uploaded and linked to the route
    let new_cert = queries::get_certificate(harness.db(RouteType::Lb), ops[0].certificate_id.unwrap())
        .await
        .unwrap();
    assert_eq!(new_cert.route_id.as_deref(), Some("inst-lb"));
    assert!(new_cert.leaf_pem.is_some());
    assert!(new_cert.fullchain_pem.is_some());
    assert!(new_cert.expires.is_some());
    let new_arn = new_cert.iam_server_certificate_arn.clone().unwrap();

    // listener now serves exactly the new certificate
    assert_eq!(harness.listeners.attached("arn:listener/1"), vec![new_arn]);

    // previous certificate was retired from the store
    assert!(!harness
        .cert_store
        .contains(old.iam_server_certificate_name.as_deref().unwrap()));
    assert!(harness
        .cert_store
        .contains(new_cert.iam_server_certificate_name.as_deref().unwrap()));

    // challenge objects were published without a leading separator
    assert!(harness
        .object_store
        .get("lb-bucket", ".well-known/acme-challenge/token-0")
        .is_some());

    // every challenge was answered
    let challenges = queries::challenges_for_certificate(harness.db(RouteType::Lb), new_cert.id)
        .await
        .unwrap();
    assert!(!challenges.is_empty());
    assert!(challenges.iter().all(|c| c.answered));

    assert_eq!(harness.alert_count(), 0);
}

#[tokio::test]
async fn full_renewal_chain_for_cdn_route() {
    let mut harness = Harness::new(happy_directory(test_bundle())).await;

    harness
        .seed_route(RouteType::Cdn, "inst-cdn", "dist-1", &["cdn.example.gov"])
        .await;
    let old = harness
        .seed_current_certificate(RouteType::Cdn, "inst-cdn", "dist-1", 5)
        .await;

    renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    harness.drain().await;

    let ops = harness.operations(RouteType::Cdn).await;
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].state, operation::OperationState::Succeeded);

    let new_cert =
        queries::get_certificate(harness.db(RouteType::Cdn), ops[0].certificate_id.unwrap())
            .await
            .unwrap();

    // distribution viewer certificate now points at the new store id
    assert_eq!(
        harness.distributions.viewer_certificate("dist-1"),
        new_cert.iam_server_certificate_id
    );

    // previous certificate retired
    assert!(!harness
        .cert_store
        .contains(old.iam_server_certificate_name.as_deref().unwrap()));

    assert_eq!(harness.alert_count(), 0);
}

#[tokio::test]
async fn sweep_selects_only_routes_inside_the_window() {
    let mut harness = Harness::new(happy_directory(test_bundle())).await;

    harness
        .seed_route(RouteType::Lb, "due", "arn:listener/due", &["due.example.gov"])
        .await;
    harness
        .seed_current_certificate(RouteType::Lb, "due", "arn:listener/due", 10)
        .await;

    harness
        .seed_route(RouteType::Lb, "fresh", "arn:listener/fresh", &["fresh.example.gov"])
        .await;
    harness
        .seed_current_certificate(RouteType::Lb, "fresh", "arn:listener/fresh", 40)
        .await;

    let enqueued = renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    assert_eq!(enqueued, 1);

    let ops = harness.operations(RouteType::Lb).await;
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].route_id, "due");

    harness.drain().await;
    assert_eq!(
        harness.operations(RouteType::Lb).await[0].state,
        operation::OperationState::Succeeded
    );
}

#[tokio::test]
async fn steps_are_idempotent_without_intervening_state_change() {
    let mut harness = Harness::new(happy_directory(test_bundle())).await;

    harness
        .seed_route(RouteType::Lb, "inst-1", "arn:listener/1", &["www.example.gov"])
        .await;
    harness
        .seed_current_certificate(RouteType::Lb, "inst-1", "arn:listener/1", 10)
        .await;

    renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    harness.drain().await;

    let db = harness.db(RouteType::Lb);
    let ops = harness.operations(RouteType::Lb).await;
    let op = &ops[0];

    let certs_before = certificate::Entity::find().all(db).await.unwrap().len();
    let challenges_before = challenge::Entity::find().all(db).await.unwrap().len();
    let uploads_before = harness.cert_store.upload_calls();
    let deletes_before = harness.cert_store.delete_calls();

    // second invocation of every mutating step, with no state change between
    for (step_index, name) in [
        (0usize, StepName::CreateAccount),
        (1, StepName::CreateKeyAndCsr),
        (2, StepName::InitiateOrder),
        (3, StepName::UploadChallengeFiles),
        (4, StepName::AnswerChallenges),
        (5, StepName::FinalizeAndRetrieve),
        (6, StepName::UploadCertificateToStore),
        (7, StepName::AssociateCertificate),
        (9, StepName::RemoveOldCertificateFromStore),
    ] {
        let unit = QueuedUnit {
            operation_id: op.id,
            route_type: RouteType::Lb,
            step_index,
            attempt: 1,
        };
        edgerenew_engine::steps::execute(&harness.ctx, &unit, name)
            .await
            .unwrap_or_else(|e| panic!("repeat of {name} failed: {e}"));
    }

    assert_eq!(
        certificate::Entity::find().all(db).await.unwrap().len(),
        certs_before,
        "no duplicate certificates"
    );
    assert_eq!(
        challenge::Entity::find().all(db).await.unwrap().len(),
        challenges_before,
        "no duplicate challenges"
    );
    assert_eq!(harness.cert_store.upload_calls(), uploads_before, "no duplicate uploads");
    assert_eq!(harness.cert_store.delete_calls(), deletes_before, "no duplicate deletes");
}

#[tokio::test]
async fn remove_old_certificate_issues_the_delete_at_most_once() {
    let mut harness = Harness::new(happy_directory(test_bundle())).await;

    harness
        .seed_route(RouteType::Lb, "inst-1", "arn:listener/1", &["www.example.gov"])
        .await;
    harness
        .seed_current_certificate(RouteType::Lb, "inst-1", "arn:listener/1", 10)
        .await;

    renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    harness.drain().await;

    let deletes_after_chain = harness.cert_store.delete_calls();
    assert_eq!(deletes_after_chain, 1);

    // invoking the step again is a structural no-op: the route's newest
    // certificate now IS the operation's certificate
    let ops = harness.operations(RouteType::Lb).await;
    let unit = QueuedUnit {
        operation_id: ops[0].id,
        route_type: RouteType::Lb,
        step_index: 9,
        attempt: 1,
    };
    edgerenew_engine::steps::execute(&harness.ctx, &unit, StepName::RemoveOldCertificateFromStore)
        .await
        .unwrap();

    assert_eq!(harness.cert_store.delete_calls(), deletes_after_chain);
}

#[tokio::test]
async fn stuck_propagation_fails_the_operation_with_one_alert() {
    let mut harness = Harness::new(happy_directory(test_bundle())).await;

    harness
        .seed_route(RouteType::Cdn, "inst-cdn", "dist-1", &["cdn.example.gov"])
        .await;
    let old = harness
        .seed_current_certificate(RouteType::Cdn, "inst-cdn", "dist-1", 10)
        .await;

    // the distribution never reaches Deployed, so the wait step (which runs
    // at most once) fails on its first attempt
    harness.distributions.set_auto_deploy(false);

    renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    harness.drain().await;

    let ops = harness.operations(RouteType::Cdn).await;
    assert_eq!(ops[0].state, operation::OperationState::Failed);
    assert_eq!(harness.alert_count(), 1);

    // the chain halted before the cleanup steps: the old certificate is
    // still in the store, and the new one never took over the route
    assert!(harness
        .cert_store
        .contains(old.iam_server_certificate_name.as_deref().unwrap()));
    let new_cert =
        queries::get_certificate(harness.db(RouteType::Cdn), ops[0].certificate_id.unwrap())
            .await
            .unwrap();
    assert!(new_cert.route_id.is_none());
}

#[tokio::test]
async fn retriable_step_succeeding_on_the_final_attempt_completes_the_chain() {
    let bundle = test_bundle();
    let mut directory = MockDirectoryClient::new();
    // account registration fails on attempts 1-23 and succeeds on 24
    directory
        .expect_register_account()
        .times(23)
        .returning(|_| Err(AcmeError::Timeout("directory unreachable".to_string())));
    directory
        .expect_register_account()
        .times(1)
        .returning(|_| Ok(registered_account()));
    directory
        .expect_new_order()
        .returning(|_, domains, _| Ok(created_order(domains, ORDER_URL)));
    directory.expect_answer_challenge().returning(|_, _, _| Ok(()));
    directory
        .expect_poll_and_finalize()
        .returning(move |_, order_url, _, _| {
            Ok(FinalizedOrder {
                fullchain_pem: bundle.clone(),
                order: SerializedOrder {
                    url: order_url.to_string(),
                    status: "valid".to_string(),
                    domains: Vec::new(),
                },
            })
        });

    let mut harness = Harness::new(directory).await;
    harness
        .seed_route(RouteType::Lb, "inst-1", "arn:listener/1", &["www.example.gov"])
        .await;
    harness
        .seed_current_certificate(RouteType::Lb, "inst-1", "arn:listener/1", 10)
        .await;

    renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    harness.drain().await;

    let ops = harness.operations(RouteType::Lb).await;
    assert_eq!(ops[0].state, operation::OperationState::Succeeded);
    assert_eq!(harness.alert_count(), 0);
}

#[tokio::test]
async fn exhausted_retries_fail_the_operation_once() {
    let mut directory = MockDirectoryClient::new();
    directory
        .expect_register_account()
        .times(24)
        .returning(|_| Err(AcmeError::Timeout("directory unreachable".to_string())));

    let mut harness = Harness::new(directory).await;
    harness
        .seed_route(RouteType::Lb, "inst-1", "arn:listener/1", &["www.example.gov"])
        .await;
    harness
        .seed_current_certificate(RouteType::Lb, "inst-1", "arn:listener/1", 10)
        .await;

    renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    harness.drain().await;

    let ops = harness.operations(RouteType::Lb).await;
    assert_eq!(ops[0].state, operation::OperationState::Failed);
    assert_eq!(harness.alert_count(), 1);
}

#[tokio::test]
async fn validation_failure_detaches_and_restarts_from_csr_generation() {
    let bundle = test_bundle();
    let mut directory = MockDirectoryClient::new();
    directory
        .expect_register_account()
        .returning(|_| Ok(registered_account()));
    directory
        .expect_new_order()
        .returning(|_, domains, _| Ok(created_order(domains, ORDER_URL)));
    directory.expect_answer_challenge().returning(|_, _, _| Ok(()));
    directory
        .expect_poll_and_finalize()
        .times(1)
        .returning(|_, _, _, _| {
            Err(AcmeError::ValidationFailed("dns lookup failed".to_string()))
        });
    directory
        .expect_poll_and_finalize()
        .times(1)
        .returning(move |_, order_url, _, _| {
            Ok(FinalizedOrder {
                fullchain_pem: bundle.clone(),
                order: SerializedOrder {
                    url: order_url.to_string(),
                    status: "valid".to_string(),
                    domains: Vec::new(),
                },
            })
        });

    let mut harness = Harness::new(directory).await;
    harness
        .seed_route(RouteType::Lb, "inst-1", "arn:listener/1", &["www.example.gov"])
        .await;
    harness
        .seed_current_certificate(RouteType::Lb, "inst-1", "arn:listener/1", 10)
        .await;

    renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    harness.drain().await;

    let db = harness.db(RouteType::Lb);
    let ops = harness.operations(RouteType::Lb).await;
    assert_eq!(ops[0].state, operation::OperationState::Succeeded);

    // the doomed certificate was abandoned and a fresh one carried the
    // operation to success: seeded + first attempt + second attempt
    let all_certs = certificate::Entity::find().all(db).await.unwrap();
    assert_eq!(all_certs.len(), 3);

    let final_cert = queries::get_certificate(db, ops[0].certificate_id.unwrap())
        .await
        .unwrap();
    assert!(final_cert.leaf_pem.is_some());
    assert_eq!(final_cert.route_id.as_deref(), Some("inst-1"));

    // the abandoned attempt never issued and never joined the route
    let abandoned: Vec<_> = all_certs
        .iter()
        .filter(|c| c.id != final_cert.id && c.route_id.is_none())
        .collect();
    assert_eq!(abandoned.len(), 1);
    assert!(abandoned[0].leaf_pem.is_none());
}

#[tokio::test]
async fn already_valid_order_refetches_the_bundle() {
    let bundle = test_bundle();
    let mut directory = MockDirectoryClient::new();
    directory
        .expect_register_account()
        .returning(|_| Ok(registered_account()));
    directory
        .expect_new_order()
        .returning(|_, domains, _| Ok(created_order(domains, ORDER_URL)));
    directory.expect_answer_challenge().returning(|_, _, _| Ok(()));
    // a duplicate attempt already finalized this order
    directory
        .expect_poll_and_finalize()
        .returning(|_, _, _, _| Err(AcmeError::OrderAlreadyValid));
    directory
        .expect_fetch_certificate()
        .times(1)
        .returning(move |_, _, _| Ok(bundle.clone()));

    let mut harness = Harness::new(directory).await;
    harness
        .seed_route(RouteType::Lb, "inst-1", "arn:listener/1", &["www.example.gov"])
        .await;
    harness
        .seed_current_certificate(RouteType::Lb, "inst-1", "arn:listener/1", 10)
        .await;

    renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    harness.drain().await;

    let ops = harness.operations(RouteType::Lb).await;
    assert_eq!(ops[0].state, operation::OperationState::Succeeded);
}

#[tokio::test]
async fn unknown_operation_units_are_dropped_silently() {
    let mut harness = Harness::new(MockDirectoryClient::new()).await;

    harness
        .queue
        .enqueue(QueuedUnit::start(999, RouteType::Cdn))
        .unwrap();
    harness.drain().await;

    assert_eq!(harness.alert_count(), 0);
    assert!(harness.operations(RouteType::Cdn).await.is_empty());
}

#[tokio::test]
async fn terminal_operations_never_run_further_steps() {
    let mut harness = Harness::new(MockDirectoryClient::new()).await;

    harness
        .seed_route(RouteType::Lb, "inst-1", "arn:listener/1", &["www.example.gov"])
        .await;
    let op = operation::ActiveModel {
        id: NotSet,
        route_id: Set("inst-1".to_string()),
        certificate_id: Set(None),
        state: Set(operation::OperationState::Failed),
        action: Set(operation::OperationAction::Renew),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(harness.db(RouteType::Lb))
    .await
    .unwrap();

    // the mock directory has no expectations: any CA call would panic
    harness
        .queue
        .enqueue(QueuedUnit::start(op.id, RouteType::Lb))
        .unwrap();
    harness.drain().await;

    let db = harness.db(RouteType::Lb);
    assert!(certificate::Entity::find().all(db).await.unwrap().is_empty());
}

#[tokio::test]
async fn backport_sweep_records_manually_rotated_certificates() {
    let harness = Harness::new(MockDirectoryClient::new()).await;

    harness
        .seed_route(RouteType::Lb, "inst-1", "arn:listener/1", &["www.example.gov"])
        .await;
    harness
        .seed_current_certificate(RouteType::Lb, "inst-1", "arn:listener/1", 40)
        .await;

    // a certificate rotated by hand, attached out-of-band
    let manual = harness.cert_store.seed("inst-1-2026-07-01-manual", 80);
    harness
        .listeners
        .add_listener_certificate("arn:listener/1", &manual.arn)
        .await
        .unwrap();
    // an unrelated instance's certificate on the same listener
    let foreign = harness.cert_store.seed("other-inst-2026-07-01-2", 80);
    harness
        .listeners
        .add_listener_certificate("arn:listener/1", &foreign.arn)
        .await
        .unwrap();

    let recorded = backport_sweep(&harness.ctx).await.unwrap();
    assert_eq!(recorded, 1);

    let db = harness.db(RouteType::Lb);
    assert!(queries::knows_store_arn(db, "inst-1", &manual.arn).await.unwrap());
    assert!(!queries::knows_store_arn(db, "inst-1", &foreign.arn).await.unwrap());

    // reconciliation is idempotent
    let recorded_again = backport_sweep(&harness.ctx).await.unwrap();
    assert_eq!(recorded_again, 0);
}

#[tokio::test]
async fn account_is_pooled_across_routes() {
    let mut harness = Harness::new(happy_directory(test_bundle())).await;

    for i in 0..2 {
        let instance = format!("inst-{i}");
        let listener = format!("arn:listener/{i}");
        harness
            .seed_route(RouteType::Lb, &instance, &listener, &["www.example.gov"])
            .await;
        harness
            .seed_current_certificate(RouteType::Lb, &instance, &listener, 10)
            .await;
    }

    renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    harness.drain().await;

    let db = harness.db(RouteType::Lb);
    let accounts = edgerenew_db::entities::acme_account::Entity::find()
        .all(db)
        .await
        .unwrap();
    // the second route reuses the first route's account: the pool cap
    // (default 50) is nowhere near exhausted
    assert_eq!(accounts.len(), 1);

    let routes = route::Entity::find().all(db).await.unwrap();
    assert!(routes.iter().all(|r| r.acme_account_id == Some(accounts[0].id)));
}

#[tokio::test]
async fn challenge_answer_errors_do_not_stop_the_chain() {
    let bundle = test_bundle();
    let mut directory = MockDirectoryClient::new();
    directory
        .expect_register_account()
        .returning(|_| Ok(registered_account()));
    directory
        .expect_new_order()
        .returning(|_, domains, _| Ok(created_order(domains, ORDER_URL)));
    // the CA rejects the first domain's answer; the second still goes out
    directory
        .expect_answer_challenge()
        .times(2)
        .returning(|_, _, challenge_url| {
            if challenge_url.ends_with("/chall/0") {
                Err(AcmeError::ChallengeSubmission("rejected".to_string()))
            } else {
                Ok(())
            }
        });
    directory
        .expect_poll_and_finalize()
        .returning(move |_, order_url, _, _| {
            Ok(FinalizedOrder {
                fullchain_pem: bundle.clone(),
                order: SerializedOrder {
                    url: order_url.to_string(),
                    status: "valid".to_string(),
                    domains: Vec::new(),
                },
            })
        });

    let mut harness = Harness::new(directory).await;
    harness
        .seed_route(
            RouteType::Lb,
            "inst-1",
            "arn:listener/1",
            &["a.example.gov", "b.example.gov"],
        )
        .await;
    harness
        .seed_current_certificate(RouteType::Lb, "inst-1", "arn:listener/1", 10)
        .await;

    renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    harness.drain().await;

    let ops = harness.operations(RouteType::Lb).await;
    assert_eq!(ops[0].state, operation::OperationState::Succeeded);

    // both challenges were marked answered despite the per-challenge error
    let challenges =
        queries::challenges_for_certificate(harness.db(RouteType::Lb), ops[0].certificate_id.unwrap())
            .await
            .unwrap();
    assert_eq!(challenges.len(), 2);
    assert!(challenges.iter().all(|c| c.answered));
}

#[tokio::test]
async fn already_valid_challenges_are_not_resubmitted() {
    let bundle = test_bundle();
    let mut directory = MockDirectoryClient::new();
    directory
        .expect_register_account()
        .returning(|_| Ok(registered_account()));
    // the order comes back with one challenge already valid
    directory.expect_new_order().returning(|_, domains, _| {
        let mut order = created_order(domains, ORDER_URL);
        order.challenges[0].body.status = "valid".to_string();
        Ok(order)
    });
    // only the pending challenge may be submitted
    directory
        .expect_answer_challenge()
        .times(1)
        .returning(|_, _, challenge_url| {
            assert!(challenge_url.ends_with("/chall/1"));
            Ok(())
        });
    directory
        .expect_poll_and_finalize()
        .returning(move |_, order_url, _, _| {
            Ok(FinalizedOrder {
                fullchain_pem: bundle.clone(),
                order: SerializedOrder {
                    url: order_url.to_string(),
                    status: "valid".to_string(),
                    domains: Vec::new(),
                },
            })
        });

    let mut harness = Harness::new(directory).await;
    harness
        .seed_route(
            RouteType::Lb,
            "inst-1",
            "arn:listener/1",
            &["a.example.gov", "b.example.gov"],
        )
        .await;
    harness
        .seed_current_certificate(RouteType::Lb, "inst-1", "arn:listener/1", 10)
        .await;

    renewal_sweep(&harness.ctx, &harness.queue).await.unwrap();
    harness.drain().await;

    let ops = harness.operations(RouteType::Lb).await;
    assert_eq!(ops[0].state, operation::OperationState::Succeeded);
}
