use anyhow::{Context, Result};

use super::*;

const DEP_A: &str = "DepA";
const DEP_B: &str = "DepB";

fn test_set() -> ConditionSet {
    ConditionSet::living(&[DEP_A, DEP_B])
}

#[test]
fn initialize_conditions_sets_all_unknown() -> Result<()> {
    let set = test_set();
    let mut status = ConditionedStatus::default();
    set.manage(&mut status).initialize_conditions();

    assert!(status.conditions.len() == 3, "expected 3 conditions, got {}", status.conditions.len());
    for cond in status.conditions.iter() {
        assert!(cond.is_unknown(), "expected condition {} to be Unknown, got {}", cond.type_, cond.status);
        assert!(cond.last_transition_time.is_some(), "expected condition {} to have a transition time", cond.type_);
    }
    let types: Vec<_> = status.conditions.iter().map(|cond| cond.type_.as_str()).collect();
    assert!(types == vec![DEP_A, DEP_B, CONDITION_READY], "expected conditions to be sorted by type, got {:?}", types);

    Ok(())
}

#[test]
fn initialize_conditions_keeps_existing() -> Result<()> {
    let set = test_set();
    let mut status = ConditionedStatus::default();
    set.manage(&mut status).mark_true(DEP_A);
    set.manage(&mut status).initialize_conditions();

    let dep_a = status.get_condition(DEP_A).context("expected DepA to be present")?;
    assert!(dep_a.is_true(), "expected DepA to remain True, got {}", dep_a.status);

    Ok(())
}

#[test]
fn ready_is_true_only_when_all_dependents_are_true() -> Result<()> {
    let set = test_set();
    let mut status = ConditionedStatus::default();
    let mut mgr = set.manage(&mut status);
    mgr.initialize_conditions();

    mgr.mark_true(DEP_A);
    assert!(!mgr.is_happy(), "expected Ready to not be True with DepB Unknown");
    mgr.mark_true(DEP_B);
    assert!(mgr.is_happy(), "expected Ready to be True with all dependents True");

    Ok(())
}

#[test]
fn ready_is_false_with_first_false_reason() -> Result<()> {
    let set = test_set();
    let mut status = ConditionedStatus::default();
    let mut mgr = set.manage(&mut status);
    mgr.initialize_conditions();

    mgr.mark_unknown(DEP_A, "Pending", "dep a is pending");
    mgr.mark_false(DEP_B, "Broken", "dep b is broken");

    let ready = mgr.get_top_level_condition().context("expected Ready to be present")?;
    assert!(ready.is_false(), "expected Ready to be False, got {}", ready.status);
    assert!(
        ready.reason.as_deref() == Some("Broken"),
        "expected Ready reason to be Broken, got {:?}",
        ready.reason
    );
    assert!(
        ready.message.as_deref() == Some("dep b is broken"),
        "expected Ready message to be carried over, got {:?}",
        ready.message
    );

    Ok(())
}

#[test]
fn ready_is_unknown_with_unknown_dependent() -> Result<()> {
    let set = test_set();
    let mut status = ConditionedStatus::default();
    let mut mgr = set.manage(&mut status);
    mgr.initialize_conditions();

    mgr.mark_true(DEP_A);
    mgr.mark_unknown(DEP_B, "Waiting", "dep b is waiting");

    let ready = mgr.get_top_level_condition().context("expected Ready to be present")?;
    assert!(ready.is_unknown(), "expected Ready to be Unknown, got {}", ready.status);
    assert!(ready.reason.as_deref() == Some("Waiting"), "expected Ready reason to be Waiting, got {:?}", ready.reason);

    Ok(())
}

#[test]
fn transition_time_only_moves_on_state_change() -> Result<()> {
    let set = test_set();
    let mut status = ConditionedStatus::default();
    set.manage(&mut status).mark_false(DEP_A, "Broken", "first");

    // Force a sentinel time so that any rewrite is observable.
    let sentinel = "2000-01-01T00:00:00Z".to_string();
    for cond in status.conditions.iter_mut() {
        cond.last_transition_time = Some(sentinel.clone());
    }

    set.manage(&mut status).mark_false(DEP_A, "Broken", "second");
    let dep_a = status.get_condition(DEP_A).context("expected DepA to be present")?;
    assert!(dep_a.message.as_deref() == Some("second"), "expected message to be updated, got {:?}", dep_a.message);
    assert!(
        dep_a.last_transition_time.as_deref() == Some(sentinel.as_str()),
        "expected transition time to be kept on same status, got {:?}",
        dep_a.last_transition_time
    );

    set.manage(&mut status).mark_true(DEP_A);
    let dep_a = status.get_condition(DEP_A).context("expected DepA to be present")?;
    assert!(
        dep_a.last_transition_time.as_deref() != Some(sentinel.as_str()),
        "expected transition time to move on status change, got {:?}",
        dep_a.last_transition_time
    );

    Ok(())
}

#[test]
fn marking_same_state_twice_is_a_noop() -> Result<()> {
    let set = test_set();
    let mut status = ConditionedStatus::default();
    let mut mgr = set.manage(&mut status);
    mgr.initialize_conditions();
    mgr.mark_true(DEP_A);
    mgr.mark_false(DEP_B, "Broken", "dep b is broken");
    let before = status.clone();

    let mut mgr = set.manage(&mut status);
    mgr.mark_true(DEP_A);
    mgr.mark_false(DEP_B, "Broken", "dep b is broken");

    assert!(status == before, "expected status to be unchanged, got {:?}, expected {:?}", status, before);

    Ok(())
}

#[test]
fn with_dependents_extends_the_set() -> Result<()> {
    let set = test_set().with_dependents(&["DepC", DEP_A]);

    assert!(set.dependents().len() == 3, "expected 3 dependents, got {:?}", set.dependents());
    assert!(set.contains("DepC"), "expected set to contain DepC");
    assert!(set.contains(CONDITION_READY), "expected set to contain Ready");

    let mut status = ConditionedStatus::default();
    let mut mgr = set.manage(&mut status);
    mgr.initialize_conditions();
    mgr.mark_true(DEP_A);
    mgr.mark_true(DEP_B);
    assert!(!mgr.is_happy(), "expected Ready to wait on the extra dependent");
    assert!(mgr.dependents_true_except(&["DepC"]), "expected all dependents but DepC to be True");
    mgr.mark_true("DepC");
    assert!(mgr.is_happy(), "expected Ready to be True once the extra dependent is True");

    Ok(())
}

#[test]
fn condition_serializes_with_kubernetes_field_names() -> Result<()> {
    let set = test_set();
    let mut status = ConditionedStatus {
        observed_generation: Some(3),
        ..Default::default()
    };
    set.manage(&mut status).mark_false(DEP_A, "Broken", "dep a is broken");

    let json = serde_json::to_value(&status)?;
    assert!(json["observedGeneration"] == 3, "expected observedGeneration 3, got {}", json["observedGeneration"]);
    let dep_a = &json["conditions"][0];
    assert!(dep_a["type"] == DEP_A, "expected type field, got {}", dep_a);
    assert!(dep_a["status"] == "False", "expected status field, got {}", dep_a);
    assert!(dep_a["reason"] == "Broken", "expected reason field, got {}", dep_a);
    assert!(dep_a.get("lastTransitionTime").is_some(), "expected lastTransitionTime field, got {}", dep_a);
    assert!(dep_a.get("severity").is_none(), "expected default severity to be omitted, got {}", dep_a);

    Ok(())
}
