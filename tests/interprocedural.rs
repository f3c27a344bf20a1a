//! Interprocedural integration tests.
//!
//! Covers summary substitution at call sites, recursion control, arity checking and the
//! parallel program driver.

use layoutscope::prelude::*;

/// Emits `base + offset` as a field address.
fn field(b: &mut ProgramBuilder, f: FunctionId, base: ValueId, offset: i64) -> Result<ValueId> {
    let offset = b.constant(f, offset, 8);
    b.op(f, Opcode::PtrSub, &[base, offset], 8)
}

/// `void set(int *q) { *q = 1; }`
fn setter(b: &mut ProgramBuilder) -> Result<FunctionId> {
    let f = b.function("set", &[8]);
    let q = b.param(f, 0)?;
    let one = b.constant(f, 1, 4);
    b.store(f, q, one)?;
    b.ret(f, &[])?;
    Ok(f)
}

fn layout_of(report: &FunctionReport) -> &StructLayout {
    &report.roots[0].layout
}

// ── Substitution ─────────────────────────────────────────────────────

#[test]
fn test_callee_accesses_at_caller_offsets() -> Result<()> {
    let mut b = ProgramBuilder::new();
    let set = setter(&mut b)?;

    // void init(struct s *p) { set(&p->x); set(&p->z); }
    let init = b.function("init", &[8]);
    let p = b.param(init, 0)?;
    let x = field(&mut b, init, p, 4)?;
    let z = field(&mut b, init, p, 12)?;
    b.call(init, Some(set), &[x], None)?;
    b.call(init, Some(set), &[z], None)?;
    b.ret(init, &[])?;
    let program = b.build();

    let session = AnalysisSession::new(&program, EngineConfig::default());
    let report = session.analyze_function(init)?;
    let layout = layout_of(&report);
    let offsets: Vec<u64> = layout.members.iter().map(|m| m.offset).collect();
    assert_eq!(offsets, [4, 12]);
    assert_eq!(layout.size, 16);
    assert!(layout
        .members
        .iter()
        .all(|m| m.access == MemberAccess::STORE));

    let expressions: Vec<&str> = report.roots[0]
        .accesses
        .iter()
        .map(|a| a.expression.as_str())
        .collect();
    assert_eq!(expressions, ["param_0 + 0x4", "param_0 + 0xc"]);

    // init and set, each once
    assert_eq!(session.summaries().computations(), 2);
    assert!(report.complete);
    Ok(())
}

#[test]
fn test_summary_shared_between_callers() -> Result<()> {
    let mut b = ProgramBuilder::new();
    let set = setter(&mut b)?;
    let callers: Vec<FunctionId> = (0..3)
        .map(|i| -> Result<FunctionId> {
            let f = b.function(format!("caller_{i}"), &[8]);
            let p = b.param(f, 0)?;
            let slot = field(&mut b, f, p, 8 * i)?;
            b.call(f, Some(set), &[slot], None)?;
            Ok(f)
        })
        .collect::<Result<_>>()?;
    let program = b.build();

    let session = AnalysisSession::new(&program, EngineConfig::default());
    for (i, &caller) in callers.iter().enumerate() {
        let report = session.analyze_function(caller)?;
        assert_eq!(layout_of(&report).members[0].offset, 8 * i as u64);
    }
    assert_eq!(session.summaries().computations(), 4);
    Ok(())
}

#[test]
fn test_returned_pointer_flows_back() -> Result<()> {
    let mut b = ProgramBuilder::new();

    // struct s *second(struct s *q) { return q->next; }   next at 0x8
    let second = b.function("second", &[8]);
    let q = b.param(second, 0)?;
    let slot = field(&mut b, second, q, 8)?;
    let next = b.load(second, slot, 8)?;
    b.ret(second, &[next])?;

    // void touch(struct s *p) { second(p)->flags = 0; }   flags at 0x10
    let touch = b.function("touch", &[8]);
    let p = b.param(touch, 0)?;
    let (_, out) = b.call(touch, Some(second), &[p], Some(8))?;
    let flags = field(&mut b, touch, out.unwrap(), 0x10)?;
    let zero = b.constant(touch, 0, 2);
    b.store(touch, flags, zero)?;
    let program = b.build();

    let report = AnalysisSession::new(&program, EngineConfig::default()).analyze_function(touch)?;
    let layout = layout_of(&report);
    let pointee = layout.member_at(8).and_then(Member::pointee).unwrap();
    assert_eq!(pointee.size, 0x12);
    assert_eq!(pointee.members[0].offset, 0x10);
    Ok(())
}

#[test]
fn test_callee_array_walk_inherited() -> Result<()> {
    let mut b = ProgramBuilder::new();

    // void clear(int *q) { for (i = 0; ; i++) q[i] = 0; }
    let clear = b.function("clear", &[8]);
    let q = b.param(clear, 0)?;
    let zero = b.constant(clear, 0, 8);
    let one = b.constant(clear, 1, 8);
    let four = b.constant(clear, 4, 8);
    let i = b.phi(clear, 8)?;
    let next = b.op(clear, Opcode::Add, &[i, one], 8)?;
    b.add_phi_input(i, zero)?;
    b.add_phi_input(i, next)?;
    let slot = b.op(clear, Opcode::PtrAdd, &[q, i, four], 8)?;
    let value = b.constant(clear, 0, 4);
    b.store(clear, slot, value)?;

    // void reset(struct s *p) { p->count = 0; clear(p->items); }   items inline at 0x8
    let reset = b.function("reset", &[8]);
    let p = b.param(reset, 0)?;
    let count = b.constant(reset, 0, 8);
    b.store(reset, p, count)?;
    let items = field(&mut b, reset, p, 8)?;
    b.call(reset, Some(clear), &[items], None)?;
    let program = b.build();

    let report = AnalysisSession::new(&program, EngineConfig::default()).analyze_function(reset)?;
    let layout = layout_of(&report);
    assert_eq!(layout.member_at(0).map(|m| &m.kind), Some(&MemberKind::Primitive));
    assert_eq!(
        layout.member_at(8).map(|m| &m.kind),
        Some(&MemberKind::Array {
            element_size: 4,
            stride: 4
        })
    );
    Ok(())
}

#[test]
fn test_indirect_call_is_opaque() -> Result<()> {
    let mut b = ProgramBuilder::new();
    let f = b.function("dispatch", &[8]);
    let p = b.param(f, 0)?;
    b.call(f, None, &[p], None)?;
    b.load(f, p, 4)?;
    let program = b.build();

    let session = AnalysisSession::new(&program, EngineConfig::default());
    let report = session.analyze_function(f)?;
    assert!(report.complete);
    assert_eq!(layout_of(&report).size, 4);
    assert!(!session.diagnostics().has_any());
    Ok(())
}

// ── Recursion ────────────────────────────────────────────────────────

#[test]
fn test_self_recursion_terminates() -> Result<()> {
    // void walk(struct node *n) { n->seen = 1; walk(n->next); }
    let mut b = ProgramBuilder::new();
    let walk = b.function("walk", &[8]);
    let n = b.param(walk, 0)?;
    let seen = field(&mut b, walk, n, 8)?;
    let one = b.constant(walk, 1, 1);
    b.store(walk, seen, one)?;
    let next = b.load(walk, n, 8)?;
    b.call(walk, Some(walk), &[next], None)?;
    let program = b.build();

    let session = AnalysisSession::new(&program, EngineConfig::default());
    let report = session.analyze_function(walk)?;
    assert!(!report.complete);
    assert_eq!(layout_of(&report).size, 9);
    assert_eq!(
        session
            .diagnostics()
            .by_kind(DiagnosticKind::RecursionLimitExceeded)
            .len(),
        1
    );
    Ok(())
}

#[test]
fn test_mutual_recursion_terminates() -> Result<()> {
    let mut b = ProgramBuilder::new();
    let even = b.function("even", &[8]);
    let odd = b.function("odd", &[8]);

    let p = b.param(even, 0)?;
    b.load(even, p, 4)?;
    b.call(even, Some(odd), &[p], None)?;

    let q = b.param(odd, 0)?;
    let tail = field(&mut b, odd, q, 4)?;
    b.load(odd, tail, 4)?;
    b.call(odd, Some(even), &[q], None)?;
    let program = b.build();

    let session = AnalysisSession::new(&program, EngineConfig::default());
    let report = session.analyze_function(even)?;
    assert!(!report.complete);
    // even's own access plus odd's, substituted
    assert_eq!(layout_of(&report).members.len(), 2);

    let odd_summary = session.summary(odd)?;
    assert!(!odd_summary.complete);
    Ok(())
}

#[test]
fn test_call_depth_limit() -> Result<()> {
    let mut b = ProgramBuilder::new();
    let mut previous = setter(&mut b)?;
    for i in 0..4 {
        let f = b.function(format!("level_{i}"), &[8]);
        let p = b.param(f, 0)?;
        b.call(f, Some(previous), &[p], None)?;
        previous = f;
    }
    let program = b.build();

    let deep = AnalysisSession::new(&program, EngineConfig::default());
    let report = deep.analyze_function(previous)?;
    assert!(report.complete);
    assert_eq!(layout_of(&report).size, 4);

    let shallow = AnalysisSession::new(&program, EngineConfig::default().with_max_call_depth(2));
    let report = shallow.analyze_function(previous)?;
    assert!(!report.complete);
    assert_eq!(layout_of(&report).size, 0);
    Ok(())
}

#[test]
fn test_depth_cut_does_not_leak_into_callee() -> Result<()> {
    // top -> mid -> set, with room for one level of calls
    let mut b = ProgramBuilder::new();
    let set = setter(&mut b)?;
    let mid = b.function("mid", &[8]);
    let m = b.param(mid, 0)?;
    b.call(mid, Some(set), &[m], None)?;
    let top = b.function("top", &[8]);
    let t = b.param(top, 0)?;
    b.call(top, Some(mid), &[t], None)?;
    let program = b.build();
    let config = EngineConfig::default().with_max_call_depth(1);

    let fresh = AnalysisSession::new(&program, config.clone());
    let alone = fresh.analyze_function(mid)?;
    assert!(alone.complete);
    assert_eq!(layout_of(&alone).size, 4);

    let session = AnalysisSession::new(&program, config);
    let outer = session.analyze_function(top)?;
    assert!(!outer.complete);
    assert_eq!(layout_of(&outer).size, 0);

    let after = session.analyze_function(mid)?;
    assert_eq!(after.complete, alone.complete);
    assert_eq!(layout_of(&after).size, layout_of(&alone).size);
    assert_eq!(layout_of(&after).members, layout_of(&alone).members);
    assert!(session.summary(mid)?.fits(1));
    Ok(())
}

// ── Arity ────────────────────────────────────────────────────────────

#[test]
fn test_arity_mismatch_reported() -> Result<()> {
    let mut b = ProgramBuilder::new();
    let set = setter(&mut b)?;
    let f = b.function("bad", &[8, 8]);
    let p = b.param(f, 0)?;
    let q = b.param(f, 1)?;
    b.call(f, Some(set), &[p, q], None)?;
    let program = b.build();

    let session = AnalysisSession::new(&program, EngineConfig::default());
    let report = session.analyze_function(f)?;
    assert_eq!(layout_of(&report).size, 0);

    let errors = session.diagnostics().errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, DiagnosticKind::ArityMismatch);
    assert_eq!(errors[0].function, Some(f));
    assert!(errors[0].message.contains("declares 1"));
    Ok(())
}

// ── Program analysis ─────────────────────────────────────────────────

fn call_graph_program() -> Result<Program> {
    let mut b = ProgramBuilder::new();
    let set = setter(&mut b)?;

    let even = b.function("even", &[8]);
    let odd = b.function("odd", &[8]);
    let p = b.param(even, 0)?;
    let slot = field(&mut b, even, p, 8)?;
    b.call(even, Some(set), &[slot], None)?;
    b.call(even, Some(odd), &[p], None)?;
    let q = b.param(odd, 0)?;
    b.load(odd, q, 8)?;
    b.call(odd, Some(even), &[q], None)?;

    for i in 0..6 {
        let f = b.function(format!("user_{i}"), &[8, 8]);
        let a = b.param(f, 0)?;
        let c = b.param(f, 1)?;
        let inner = b.load(f, c, 8)?;
        let slot = field(&mut b, f, a, 4 * i)?;
        b.call(f, Some(set), &[slot], None)?;
        b.call(f, Some(even), &[inner], None)?;
    }
    Ok(b.build())
}

#[test]
fn test_program_parallel_matches_sequential() -> Result<()> {
    let program = call_graph_program()?;

    let parallel = AnalysisSession::new(&program, EngineConfig::default());
    let sequential = AnalysisSession::new(&program, EngineConfig::default().sequential());
    let left = parallel.analyze_program()?;
    let right = sequential.analyze_program()?;

    assert_eq!(left.len(), program.function_count());
    assert_eq!(left.len(), right.len());
    for (l, r) in left.iter().zip(&right) {
        assert_eq!(l.to_string(), r.to_string());
        assert_eq!(l.complete, r.complete);
        for (lr, rr) in l.roots.iter().zip(&r.roots) {
            assert_eq!(lr.layout, rr.layout);
            assert_eq!(lr.accesses, rr.accesses);
        }
    }
    assert_eq!(
        parallel.summaries().computations(),
        sequential.summaries().computations()
    );
    Ok(())
}

#[test]
fn test_program_report_contents() -> Result<()> {
    let program = call_graph_program()?;
    let session = AnalysisSession::new(&program, EngineConfig::default());
    let reports = session.analyze_program()?;

    let user = reports.iter().find(|r| r.name == "user_2").unwrap();
    let second = user.root(1).unwrap();
    // user_2's second parameter points at what `even` hands to `set`
    let pointee = second.layout.member_at(0).and_then(Member::pointee).unwrap();
    assert_eq!(pointee.member_at(8).map(|m| m.size), Some(4));
    assert!(!user.complete);

    let set = reports.iter().find(|r| r.name == "set").unwrap();
    assert!(set.complete);
    assert_eq!(layout_of(set).size, 4);
    Ok(())
}
