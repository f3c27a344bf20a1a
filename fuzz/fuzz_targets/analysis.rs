#![no_main]

use libfuzzer_sys::fuzz_target;
use layoutscope::prelude::*;

const OPCODES: [Opcode; 12] = [
    Opcode::Copy,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Shl,
    Opcode::And,
    Opcode::PtrAdd,
    Opcode::PtrSub,
    Opcode::Load,
    Opcode::Phi,
    Opcode::SignExtend,
    Opcode::Neg,
];

// Builds a small multi-function program from the input bytes. Builder errors just skip the
// offending instruction; every program that gets built must analyze without panicking.
fuzz_target!(|data: &[u8]| {
    let mut bytes = data.iter().copied();
    let mut next = move || bytes.next();

    let mut b = ProgramBuilder::new();
    let count = usize::from(next().unwrap_or(1) % 4) + 1;
    let functions: Vec<FunctionId> = (0..count)
        .map(|i| {
            let params = usize::from(next().unwrap_or(1) % 3) + 1;
            b.function(format!("f{i}"), &vec![8; params])
        })
        .collect();

    let mut values: Vec<Vec<ValueId>> = functions
        .iter()
        .map(|&f| {
            let mut own = Vec::new();
            let mut i = 0;
            while let Ok(p) = b.param(f, i) {
                own.push(p);
                i += 1;
            }
            own
        })
        .collect();
    let mut phis: Vec<ValueId> = Vec::new();

    while let (Some(selector), Some(a), Some(c)) = (next(), next(), next()) {
        let fi = usize::from(selector >> 4) % count;
        let f = functions[fi];
        let own = &values[fi];
        let x = own[usize::from(a) % own.len()];
        let y = own[usize::from(c) % own.len()];

        let produced = match selector % 8 {
            0 => Some(b.constant(f, i64::from(a as i8), 8)),
            1 => b.store(f, x, y).ok().map(|_| x),
            2 => {
                let callee = functions[usize::from(a) % count];
                b.call(f, Some(callee), &[x, y], Some(8)).ok().and_then(|(_, out)| out)
            }
            3 => {
                let phi = b.phi(f, 8).ok();
                if let Some(phi) = phi {
                    let _ = b.add_phi_input(phi, x);
                    phis.push(phi);
                }
                phi
            }
            4 => {
                if let Some(&phi) = phis.get(usize::from(a) % phis.len().max(1)) {
                    let _ = b.add_phi_input(phi, y);
                }
                None
            }
            _ => {
                let opcode = OPCODES[usize::from(a) % OPCODES.len()];
                let inputs: Vec<ValueId> = match opcode.arity() {
                    Some(1) => vec![x],
                    Some(3) => vec![x, y, y],
                    _ => vec![x, y],
                };
                b.op(f, opcode, &inputs, 8).ok()
            }
        };
        if let Some(value) = produced {
            values[fi].push(value);
        }
    }

    let program = b.build();
    let config = EngineConfig::default().with_node_limit(8).with_max_call_depth(4);
    let session = AnalysisSession::new(&program, config);
    let _ = session.analyze_program();
});
