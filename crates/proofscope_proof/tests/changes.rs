//! Transactional edits: add/delete/batch semantics, rollback guarantees,
//! proof-level pops and appends.

mod common;

use common::{fixture, FakeFactory};
use lsp_types::{Diagnostic, Position};
use proofscope_lsp::{Goal, GoalConfig, Hyp};
use proofscope_proof::{
    ChangeOp, ExternalChanges, ProofFile, ProofFileError, ProofFileOptions, ProofHandle, ProofOp,
};

const VALID: &str = "\
Module Out.

Module In.
  Theorem plus_O_n : forall n:nat, 0 + n = n.
    Proof.
      intros n.
      Print plus.
      reduce_eq.
    Qed.
End In.
End Out.

Theorem mult_0_plus : forall n m : nat,
    0 + (S n * m) = S n * m.
  Proof.
    intros n m.
    rewrite -> (plus_O_n (S n * m)).
";

fn valid_factory() -> (FakeFactory, tempfile::NamedTempFile) {
    let library = fixture(
        "Definition plus := 0.\n\
         Notation minus := Nat.sub (only parsing).\n",
    );
    let factory = FakeFactory::new();
    factory.configure(|config| {
        config
            .libraries
            .push(("TestLib".to_string(), library.path().to_path_buf()));
        config.tactic_goals.insert(
            "intros n.".to_string(),
            vec![Goal {
                hyps: vec![Hyp {
                    names: vec!["n".to_string()],
                    ty: "nat".to_string(),
                    definition: None,
                }],
                ty: "0 + n = n".to_string(),
            }],
        );
        config
            .references
            .insert("Print plus.".to_string(), vec!["plus".to_string()]);
        config
            .references
            .insert("Print minus.".to_string(), vec!["minus".to_string()]);
        config.unknown_tokens.insert("invalid_tactic".to_string());
    });
    (factory, library)
}

fn open_valid(factory: &FakeFactory) -> (ProofFile, tempfile::NamedTempFile) {
    let file = fixture(VALID);
    let mut proof_file = ProofFile::open(
        Box::new(factory.clone()),
        file.path(),
        ProofFileOptions::default(),
    )
    .expect("open valid file");
    proof_file.run().expect("run valid file");
    (proof_file, file)
}

/// Everything observable about the file, for rollback and no-op checks.
#[derive(Debug, Clone, PartialEq)]
struct Observed {
    source: String,
    disk: String,
    step_texts: Vec<String>,
    steps_taken: usize,
    valid: bool,
    diagnostics: Vec<Diagnostic>,
    proofs: Vec<ObservedProof>,
    open_proofs: Vec<ObservedProof>,
}

/// Goal snapshots compare structurally; the document version is execution
/// metadata and changes on every synchronization.
#[derive(Debug, Clone, PartialEq)]
struct ObservedProof {
    text: String,
    steps: Vec<(String, Position, Option<GoalConfig>, Vec<String>)>,
}

fn observe(proof_file: &ProofFile) -> Observed {
    let snap = |proofs: Vec<&proofscope_proof::ProofEntry>| -> Vec<ObservedProof> {
        proofs
            .iter()
            .map(|p| ObservedProof {
                text: p.text().to_string(),
                steps: p
                    .steps
                    .iter()
                    .map(|s| {
                        (
                            s.text.clone(),
                            s.goals.position,
                            s.goals.goals.clone(),
                            s.context.iter().map(|t| t.text.clone()).collect(),
                        )
                    })
                    .collect(),
            })
            .collect()
    };
    Observed {
        source: proof_file.source().to_string(),
        disk: std::fs::read_to_string(proof_file.path()).expect("read file"),
        step_texts: proof_file.steps().iter().map(|s| s.text.clone()).collect(),
        steps_taken: proof_file.steps_taken(),
        valid: proof_file.is_valid(),
        diagnostics: proof_file.diagnostics(),
        proofs: snap(proof_file.proofs()),
        open_proofs: snap(proof_file.open_proofs()),
    }
}

#[test]
fn delete_then_add_restores_everything() {
    let (factory, _library) = valid_factory();
    let (mut proof_file, _file) = open_valid(&factory);
    let before = observe(&proof_file);

    // Remove `intros n.` from the first proof.
    proof_file.delete_step(4).unwrap();
    assert_eq!(proof_file.steps().len(), 13);
    let proof = proof_file.proofs()[0];
    let texts: Vec<&str> = proof.steps.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(
        texts,
        vec!["\n    Proof.", "\n      Print plus.", "\n      reduce_eq.", "\n    Qed."]
    );
    // With the intro gone, `Print plus.` sees the bare statement again.
    assert_eq!(
        proof.steps[1].goals.foreground()[0].ty,
        "forall n:nat, 0 + n = n"
    );
    assert!(proof.steps[1].goals.foreground()[0].hyps.is_empty());

    // Put it back: every observable equals the initial state.
    proof_file.add_step(3, "\n      intros n.").unwrap();
    assert_eq!(observe(&proof_file), before);
}

#[test]
fn added_step_resolves_its_context() {
    let (factory, _library) = valid_factory();
    let (mut proof_file, _file) = open_valid(&factory);

    proof_file.add_step(5, "\n      Print minus.").unwrap();
    assert_eq!(proof_file.steps()[6].text, "\n      Print minus.");

    let proof = proof_file.proofs()[0];
    assert_eq!(proof.steps[3].text, "\n      Print minus.");
    let context: Vec<&str> = proof.steps[3].context.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(context, vec!["Notation minus := Nat.sub (only parsing)."]);
    // Goals still carry the intro hypothesis.
    assert_eq!(proof.steps[3].goals.foreground()[0].hyps[0].names, vec!["n"]);
}

#[test]
fn invalid_add_rolls_back_byte_for_byte() {
    let (factory, _library) = valid_factory();
    let (mut proof_file, _file) = open_valid(&factory);
    let before = observe(&proof_file);

    // A tactic the checker does not know: new error diagnostic.
    let err = proof_file
        .add_step(4, "\n      invalid_tactic.")
        .unwrap_err();
    assert!(matches!(err, ProofFileError::InvalidAdd(_)));
    assert_eq!(observe(&proof_file), before);
    assert!(!before.disk.contains("invalid_tactic"));

    // Two sentences in one step text.
    let err = proof_file
        .add_step(4, "\n      intros a. intros b.")
        .unwrap_err();
    assert!(matches!(err, ProofFileError::InvalidStep(_)));
    assert_eq!(observe(&proof_file), before);

    // Glues onto the previous sentence.
    let err = proof_file.add_step(4, "x.").unwrap_err();
    assert!(matches!(err, ProofFileError::InvalidAdd(_)));
    assert_eq!(observe(&proof_file), before);

    // Whitespace-only and comment-only texts are not steps at all.
    let err = proof_file.add_step(4, "\n \t").unwrap_err();
    assert!(matches!(err, ProofFileError::InvalidStep(_)));
    let err = proof_file.add_step(4, "\n(* I'm useless *)").unwrap_err();
    assert!(matches!(err, ProofFileError::InvalidStep(_)));
    assert_eq!(observe(&proof_file), before);
}

#[test]
fn invalid_delete_rolls_back() {
    let (factory, _library) = valid_factory();
    let (mut proof_file, _file) = open_valid(&factory);
    let before = observe(&proof_file);

    // Deleting the statement leaves an orphan proof script.
    let err = proof_file.delete_step(2).unwrap_err();
    assert!(matches!(err, ProofFileError::InvalidDelete(_)));
    assert_eq!(observe(&proof_file), before);

    // Deleting the closing tactic leaves `Qed.` unprovable.
    let err = proof_file.delete_step(6).unwrap_err();
    assert!(matches!(err, ProofFileError::InvalidDelete(_)));
    assert_eq!(observe(&proof_file), before);
}

#[test]
fn batch_change_applies_per_operation_indices() {
    let (factory, _library) = valid_factory();
    let (mut proof_file, _file) = open_valid(&factory);

    proof_file
        .change_steps(&[
            ChangeOp::delete(4),
            ChangeOp::add(3, "\n      intros n."),
            ChangeOp::add(5, "\n      Print minus."),
        ])
        .unwrap();

    assert_eq!(proof_file.steps()[4].text, "\n      intros n.");
    assert_eq!(proof_file.steps()[6].text, "\n      Print minus.");
    let proof = proof_file.proofs()[0];
    assert_eq!(proof.steps.len(), 6);
    let context: Vec<&str> = proof.steps[3].context.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(context, vec!["Notation minus := Nat.sub (only parsing)."]);
}

#[test]
fn batch_can_add_and_remove_whole_proofs() {
    let (factory, _library) = valid_factory();
    let (mut proof_file, _file) = open_valid(&factory);
    let proofs = proof_file.proofs().len();
    let taken = proof_file.steps_taken();

    proof_file
        .change_steps(&[
            ChangeOp::add(0, "\nTheorem change_steps : forall n:nat, 0 + n = n."),
            ChangeOp::add(1, "\nProof."),
            ChangeOp::add(2, "\nintros n."),
            ChangeOp::add(3, "\nreduce_eq."),
            ChangeOp::add(4, "\nQed."),
        ])
        .unwrap();
    assert_eq!(proof_file.steps_taken(), taken + 5);
    assert_eq!(proof_file.proofs().len(), proofs + 1);

    // Remove the same proof again, one index repeated five times.
    proof_file
        .change_steps(&vec![ChangeOp::delete(1); 5])
        .unwrap();
    assert_eq!(proof_file.steps_taken(), taken);
    assert_eq!(proof_file.proofs().len(), proofs);
}

#[test]
fn failed_batch_is_atomic() {
    let (factory, _library) = valid_factory();
    let (mut proof_file, _file) = open_valid(&factory);
    let before = observe(&proof_file);

    // The second operation breaks the proof: everything rolls back.
    let err = proof_file
        .change_steps(&[
            ChangeOp::add(5, "\n      Print minus."),
            ChangeOp::delete(7),
        ])
        .unwrap_err();
    assert!(matches!(err, ProofFileError::InvalidChange(_)));
    assert_eq!(observe(&proof_file), before);
}

#[test]
fn end_of_file_add_delete_cycles() {
    let factory = FakeFactory::new();
    let file = fixture("Example test1 : 1 + 1 = 2.\nProof.\nreflexivity.\nQed.\n");
    let mut proof_file = ProofFile::open(
        Box::new(factory.clone()),
        file.path(),
        ProofFileOptions::default(),
    )
    .unwrap();
    proof_file.run().unwrap();
    let steps = proof_file.steps().len();

    for _ in 0..5 {
        proof_file
            .add_step(proof_file.steps_taken() - 1, "\nPrint plus.")
            .unwrap();
        assert_eq!(proof_file.steps().len(), steps + 1);
        proof_file.delete_step(proof_file.steps_taken()).unwrap();
        assert_eq!(proof_file.steps().len(), steps);
    }
}

#[test]
fn end_of_file_without_newline_rejects_glued_add() {
    let factory = FakeFactory::new();
    // No trailing newline at all.
    let file = fixture("Theorem t : True.\nexact I.\nQed.");
    let mut proof_file = ProofFile::open(
        Box::new(factory.clone()),
        file.path(),
        ProofFileOptions::default(),
    )
    .unwrap();
    proof_file.run().unwrap();

    let last = proof_file.steps().len() - 1;
    let err = proof_file.add_step(last, "Print plus.").unwrap_err();
    assert!(matches!(err, ProofFileError::InvalidStep(_)));
    proof_file.add_step(last, "\nPrint plus.").unwrap();
}

#[test]
fn deleting_a_terminator_reopens_the_proof() {
    let factory = FakeFactory::new();
    let file = fixture(
        "Theorem d1 : True.\nexact I.\nQed.\n\
         Theorem d2 : True.\nexact I.\nQed.\n",
    );
    let mut proof_file = ProofFile::open(
        Box::new(factory.clone()),
        file.path(),
        ProofFileOptions::default(),
    )
    .unwrap();
    proof_file.run().unwrap();
    assert_eq!(proof_file.proofs().len(), 2);

    proof_file.delete_step(2).unwrap();
    assert_eq!(proof_file.proofs().len(), 1);
    let open = proof_file.open_proofs();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].text(), "Theorem d1 : True.");
    // d2 still closes even though d1 stays open around it.
    assert_eq!(proof_file.proofs()[0].text(), "Theorem d2 : True.");
}

#[test]
fn pop_and_append_roundtrip_a_proof() {
    let factory = FakeFactory::new();
    let file = fixture(
        "Example test1 : 1 + 1 = 2.\nProof.\nreflexivity.\nQed.\n\n\
         Example test2 : 1 + 1 + 1 = 3.\nProof.\nreflexivity.\nQed.\n",
    );
    let mut proof_file = ProofFile::open(
        Box::new(factory.clone()),
        file.path(),
        ProofFileOptions::default(),
    )
    .unwrap();
    proof_file.run().unwrap();
    assert_eq!(proof_file.proofs().len(), 2);
    assert!(proof_file.unproven_proofs().is_empty());

    // Pop `Qed.` and `reflexivity.` off the second proof; it re-opens.
    proof_file
        .change_proof(ProofHandle::Closed(1), &[ProofOp::Pop, ProofOp::Pop])
        .unwrap();
    let unproven = proof_file.unproven_proofs();
    assert_eq!(unproven.len(), 1);
    assert_eq!(unproven[0].text(), "Example test2 : 1 + 1 + 1 = 3.");
    assert_eq!(unproven[0].steps.len(), 1, "only `Proof.` remains");

    // Build it back up.
    proof_file
        .change_proof(
            ProofHandle::Open(0),
            &[
                ProofOp::Append("\nreflexivity.".to_string()),
                ProofOp::Append("\nQed.".to_string()),
            ],
        )
        .unwrap();
    assert!(proof_file.unproven_proofs().is_empty());
    assert_eq!(proof_file.proofs().len(), 2);
}

#[test]
fn pop_then_append_same_text_is_identity() {
    let factory = FakeFactory::new();
    let file = fixture("Theorem t : True.\nexact I.\nQed.\n");
    let mut proof_file = ProofFile::open(
        Box::new(factory.clone()),
        file.path(),
        ProofFileOptions::default(),
    )
    .unwrap();
    proof_file.run().unwrap();
    let before = observe(&proof_file);

    let popped = proof_file.proofs()[0].steps.last().unwrap().text.clone();
    proof_file.pop_step(ProofHandle::Closed(0)).unwrap();
    assert_eq!(proof_file.proofs().len(), 0);
    proof_file
        .append_step(ProofHandle::Open(0), &popped)
        .unwrap();
    assert_eq!(observe(&proof_file), before);
}

#[test]
fn append_closes_open_proofs_in_stack_order() {
    let factory = FakeFactory::new();
    let file = fixture(
        "Theorem c1 : True.\nexact I.\n\
         Theorem c2 : True.\nexact I.\n",
    );
    let mut proof_file = ProofFile::open(
        Box::new(factory.clone()),
        file.path(),
        ProofFileOptions::default(),
    )
    .unwrap();
    proof_file.run().unwrap();
    assert_eq!(proof_file.open_proofs().len(), 2);

    // Close the newest first; handles are re-read each time.
    proof_file.append_step(ProofHandle::Open(0), "\nQed.").unwrap();
    assert_eq!(proof_file.open_proofs().len(), 1);
    proof_file.append_step(ProofHandle::Open(0), "\nQed.").unwrap();
    assert!(proof_file.open_proofs().is_empty());
    assert_eq!(proof_file.proofs().len(), 2);
}

#[test]
fn policy_can_forbid_changes_outside_proofs() {
    let (factory, _library) = valid_factory();
    let file = fixture(VALID);
    let mut proof_file = ProofFile::open(
        Box::new(factory.clone()),
        file.path(),
        ProofFileOptions {
            external_changes: ExternalChanges::Forbid,
            ..ProofFileOptions::default()
        },
    )
    .unwrap();
    proof_file.run().unwrap();

    // Step 0 is `Module Out.`: not part of any proof.
    let err = proof_file.add_step(0, "\nPrint plus.").unwrap_err();
    assert!(matches!(err, ProofFileError::InvalidAdd(_)));
    let err = proof_file.delete_step(0).unwrap_err();
    assert!(matches!(err, ProofFileError::InvalidDelete(_)));

    // Inside the proof both work.
    proof_file.add_step(5, "\n      Print minus.").unwrap();
    proof_file.delete_step(6).unwrap();
}

#[test]
fn changes_outside_proofs_allowed_by_default() {
    let (factory, _library) = valid_factory();
    let (mut proof_file, _file) = open_valid(&factory);
    let steps = proof_file.steps().len();

    proof_file.add_step(1, "\nPrint plus.").unwrap();
    assert_eq!(proof_file.steps().len(), steps + 1);
    assert_eq!(proof_file.steps()[2].text, "\nPrint plus.");

    proof_file.delete_step(2).unwrap();
    assert_eq!(proof_file.steps().len(), steps);
    assert_eq!(
        proof_file.steps()[2].text,
        "\n  Theorem plus_O_n : forall n:nat, 0 + n = n."
    );
}
