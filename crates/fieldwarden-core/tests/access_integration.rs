//! Integration tests for access decisions and the audit trail.

use chrono::NaiveDate;
use fieldwarden_core::security::{
    verify_chain, AccessDecision, AccessGateway, AuditAction, AuditRecorder, FieldMasker,
    FieldPolicyRegistry, FileAuditSink, MaskedValue, MaskingStrategy, MemoryAuditSink,
    PolicyEngine, Principal, Role, SledAuditSink, SourceAddress, Subject,
};
use fieldwarden_core::Value;
use std::sync::Arc;

const SENSITIVE: &[&str] = &["phone_number", "birth_date", "location"];

struct TestContext {
    registry: Arc<FieldPolicyRegistry>,
    sink: Arc<MemoryAuditSink>,
    gateway: AccessGateway,
}

impl TestContext {
    fn new() -> Self {
        let registry = Arc::new(FieldPolicyRegistry::user_accounts());
        let sink = Arc::new(MemoryAuditSink::new());
        let recorder = Arc::new(AuditRecorder::new(sink.clone()));
        let gateway = AccessGateway::new(PolicyEngine::new(registry.clone()), recorder);
        Self {
            registry,
            sink,
            gateway,
        }
    }

    fn engine(&self) -> &PolicyEngine {
        self.gateway.engine()
    }

    fn all_fields(&self) -> Vec<String> {
        self.registry.policies().map(|p| p.name.clone()).collect()
    }
}

fn superuser() -> Principal {
    Principal::from_flags("1", "admin@example.com", true, true)
}

fn staff() -> Principal {
    Principal::from_flags("2", "support@example.com", false, true)
}

fn principals() -> Vec<Principal> {
    vec![
        superuser(),
        staff(),
        Principal::from_flags("3", "member@example.com", false, false),
        Principal::new("4", "tier2@example.com", Some("support_tier2")),
    ]
}

fn subjects() -> Vec<Subject> {
    let base = |id: &str| {
        Subject::new(id, format!("{}@example.com", id))
            .with_field("email", format!("{}@example.com", id))
            .with_field("display_name", "Sam")
            .with_field("created_at", "2024-01-01T09:00:00Z")
            .with_field("updated_at", "2024-02-01T09:00:00Z")
            .with_field("last_login_at", "2024-03-01T09:00:00Z")
            .with_field("hcw_attested_at", "2024-01-02T09:00:00Z")
    };
    vec![
        base("u-1")
            .with_field("phone_number", "(555) 123-4567")
            .with_field("birth_date", NaiveDate::from_ymd_opt(1990, 5, 15).unwrap())
            .with_field("location", "Lisbon"),
        base("u-2")
            .with_field("phone_number", "12")
            .with_field("birth_date", "not a date")
            .with_field("location", ""),
        base("u-3")
            .with_field("phone_number", "+44 20 7946 0958")
            .with_field("birth_date", "1985-12-01"),
    ]
}

fn source() -> SourceAddress {
    SourceAddress::from_forwarded(Some("203.0.113.9, 10.0.0.2"), Some("10.0.0.2"))
}

#[test]
fn sensitive_fields_never_raw_for_masked_roles() {
    let ctx = TestContext::new();
    let fields = ctx.all_fields();

    for principal in principals() {
        let role = ctx.engine().role_of(&principal);
        for subject in subjects() {
            let decisions = ctx.engine().decide_all(&principal, &subject, &fields);
            for decision in decisions.iter().filter(|d| SENSITIVE.contains(&d.field.as_str())) {
                let policy = ctx.registry.lookup(&decision.field).unwrap();
                if policy.unmasked_for.contains(&role) || !decision.visible {
                    continue;
                }
                let raw = subject.get(&decision.field).cloned().unwrap_or(Value::Null);
                if !raw.is_null() {
                    assert_ne!(
                        decision.rendered_value.as_ref(),
                        Some(&raw),
                        "{} leaked {} to {}",
                        subject.id,
                        decision.field,
                        role
                    );
                }
            }
        }
    }
}

#[test]
fn unknown_fields_fail_closed() {
    let ctx = TestContext::new();
    let unknown = ["ssn", "salary", "", "phone_number ", "PHONE_NUMBER"];

    for principal in principals() {
        for decision in ctx.engine().decide_all(&principal, &subjects()[0], &unknown) {
            assert!(!decision.visible);
            assert!(!decision.editable);
            assert_eq!(decision.rendered_value, None);
        }
    }
}

#[test]
fn editable_implies_visible() {
    let ctx = TestContext::new();
    let fields = ctx.all_fields();

    for principal in principals() {
        for subject in subjects() {
            for decision in ctx.engine().decide_all(&principal, &subject, &fields) {
                if decision.editable {
                    assert!(decision.visible, "{} editable but hidden", decision.field);
                }
            }
        }
    }
}

#[test]
fn always_readonly_fields_never_editable() {
    let ctx = TestContext::new();
    let readonly: Vec<&str> = ctx
        .registry
        .policies()
        .filter(|p| p.always_readonly)
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(
        readonly,
        vec!["hcw_attested_at", "last_login_at", "created_at", "updated_at"]
    );

    for principal in principals() {
        for decision in ctx.engine().decide_all(&principal, &subjects()[0], &readonly) {
            assert!(!decision.editable, "{} editable", decision.field);
        }
    }
}

#[test]
fn masking_is_deterministic_across_threads() {
    let inputs = vec![
        Value::from("(555) 123-4567"),
        Value::from("12"),
        Value::from("1990-05-15"),
        Value::from(NaiveDate::from_ymd_opt(2001, 9, 9).unwrap()),
    ];
    let strategies = [
        MaskingStrategy::PhoneLast4,
        MaskingStrategy::YearOnly,
        MaskingStrategy::FullyHidden,
    ];
    let expected: Vec<MaskedValue> = inputs
        .iter()
        .flat_map(|v| strategies.iter().map(move |s| FieldMasker::mask(v, *s)))
        .collect();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let actual: Vec<MaskedValue> = inputs
                    .iter()
                    .flat_map(|v| strategies.iter().map(move |s| FieldMasker::mask(v, *s)))
                    .collect();
                assert_eq!(actual, expected);
            });
        }
    });
}

#[test]
fn one_audit_entry_per_detail_view() {
    let ctx = TestContext::new();
    let fields = ctx.all_fields();

    let view = ctx
        .gateway
        .view_fields(&superuser(), &subjects()[0], &fields, &source());
    assert_eq!(view.decisions.len(), fields.len());
    assert_eq!(ctx.sink.len(), 1);

    ctx.gateway.view_detail(&staff(), &subjects()[1], &source());
    assert_eq!(ctx.sink.len(), 2);

    let entries = ctx.sink.entries();
    assert_eq!(entries[0].entry.action, AuditAction::ViewDetail);
    assert_eq!(entries[0].entry.source_address, "203.0.113.9");
    assert_eq!(entries[1].entry.actor_id, "2");
    verify_chain(&entries).unwrap();
}

#[test]
fn scenario_phone_masking() {
    assert_eq!(
        FieldMasker::mask(&Value::from("(555) 123-4567"), MaskingStrategy::PhoneLast4),
        MaskedValue::Value(Value::from("***-4567"))
    );
    assert_eq!(
        FieldMasker::mask(&Value::from("12"), MaskingStrategy::PhoneLast4),
        MaskedValue::Value(Value::from("***-????"))
    );
}

#[test]
fn scenario_birth_date_masking() {
    let date = NaiveDate::from_ymd_opt(1990, 5, 15).unwrap();
    assert_eq!(
        FieldMasker::mask(&Value::Date(date), MaskingStrategy::YearOnly),
        MaskedValue::Value(Value::from("1990-**-**"))
    );
}

#[test]
fn scenario_staff_location_hidden() {
    let ctx = TestContext::new();
    let decision = ctx.engine().decide(&staff(), &subjects()[0], "location");
    assert_eq!(decision, AccessDecision::deny("location"));
    assert!(!ctx.registry.fieldset_for(&Role::staff()).contains(&"location"));
}

#[test]
fn scenario_superuser_phone_raw_and_editable() {
    let ctx = TestContext::new();
    let decision = ctx.engine().decide(&superuser(), &subjects()[0], "phone_number");
    assert!(decision.visible);
    assert!(decision.editable);
    assert_eq!(decision.rendered_value, Some(Value::from("(555) 123-4567")));
}

#[test]
fn scenario_staff_created_at_readonly() {
    let ctx = TestContext::new();
    let decision = ctx.engine().decide(&staff(), &subjects()[0], "created_at");
    assert!(decision.visible);
    assert!(!decision.editable);
}

#[test]
fn staff_detail_view_shape() {
    let ctx = TestContext::new();
    let view = ctx.gateway.view_detail(&staff(), &subjects()[0], &source());
    let rendered = view.render();

    for field in SENSITIVE {
        assert!(!rendered.contains_key(*field), "{} present", field);
    }
    assert_eq!(rendered.get("email"), Some(&serde_json::json!("u-1@example.com")));
    assert!(!view.editable_fields().contains(&"email"));
    assert!(view.editable_fields().contains(&"bio"));
    assert!(!rendered.contains_key("is_staff"));
    assert!(!rendered.contains_key("email_verified"));
}

#[test]
fn concurrent_views_append_without_loss() {
    let ctx = TestContext::new();
    let subjects = subjects();

    std::thread::scope(|scope| {
        for t in 0..8 {
            let gateway = ctx.gateway.clone();
            let subjects = &subjects;
            scope.spawn(move || {
                let principal = if t % 2 == 0 { superuser() } else { staff() };
                for i in 0..25 {
                    let view = gateway.view_detail(&principal, &subjects[i % subjects.len()], &source());
                    assert!(view.audit.is_ok());
                }
            });
        }
    });

    let entries = ctx.sink.entries();
    assert_eq!(entries.len(), 200);
    verify_chain(&entries).unwrap();
}

#[test]
fn concurrent_file_appends_are_whole_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let recorder = Arc::new(AuditRecorder::new(Arc::new(FileAuditSink::open(&path).unwrap())));
    let engine = PolicyEngine::new(Arc::new(FieldPolicyRegistry::user_accounts()));
    let gateway = AccessGateway::new(engine, recorder);
    let subjects = subjects();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let gateway = gateway.clone();
            let subjects = &subjects;
            scope.spawn(move || {
                for subject in subjects.iter().cycle().take(30) {
                    gateway.view_detail(&staff(), subject, &source());
                }
            });
        }
    });

    let entries = FileAuditSink::read_all(&path).unwrap();
    assert_eq!(entries.len(), 120);
    verify_chain(&entries).unwrap();
}

#[test]
fn sled_trail_outlives_recorder() {
    let dir = tempfile::tempdir().unwrap();
    let db = sled::open(dir.path()).unwrap();
    {
        let recorder = AuditRecorder::new(Arc::new(SledAuditSink::open(&db).unwrap()));
        let gateway = AccessGateway::new(
            PolicyEngine::new(Arc::new(FieldPolicyRegistry::user_accounts())),
            Arc::new(recorder),
        );
        gateway.view_list(&staff(), &subjects(), &source());
        gateway.recorder().flush().unwrap();
    }

    let sink = SledAuditSink::open(&db).unwrap();
    let entries = sink.entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry.action, AuditAction::ViewList);
    assert_eq!(entries[0].entry.subject_label, "3 records");
    verify_chain(&entries).unwrap();
}

#[test]
fn torn_file_trail_keeps_serving_views() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    let engine = PolicyEngine::new(Arc::new(FieldPolicyRegistry::user_accounts()));
    {
        let recorder = AuditRecorder::new(Arc::new(FileAuditSink::open(&path).unwrap()));
        let gateway = AccessGateway::new(engine.clone(), Arc::new(recorder));
        assert!(gateway.view_detail(&staff(), &subjects()[0], &source()).audit.is_ok());
    }

    let mut contents = std::fs::read_to_string(&path).unwrap();
    contents.push_str(r#"{"sequence":1,"prev_hash":"ab"#);
    std::fs::write(&path, &contents).unwrap();

    let recorder = AuditRecorder::new(Arc::new(FileAuditSink::open(&path).unwrap()));
    let gateway = AccessGateway::new(engine, Arc::new(recorder));
    let view = gateway.view_detail(&superuser(), &subjects()[0], &source());

    assert!(view.audit.is_err());
    assert_eq!(
        view.render().get("phone_number"),
        Some(&serde_json::json!("(555) 123-4567"))
    );
    assert_eq!(gateway.recorder().failed_writes(), 1);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), contents);
}

#[test]
fn loaded_policies_cannot_expose_raw_sensitive_values() {
    let document = r#"{
        "version": "custom/1",
        "fields": [
            {"name": "phone_number", "viewable_by": ["superuser", "staff"],
             "unmasked_for": ["superuser"], "sensitive": true}
        ]
    }"#;
    assert!(FieldPolicyRegistry::from_json(document).is_err());
}
