use crate::ir::{FunctionId, OpId, Opcode, Program, ProgramBuilder, ValueId};

/// Emits `base + offset` as a field address.
pub fn field(b: &mut ProgramBuilder, f: FunctionId, base: ValueId, offset: i64) -> ValueId {
    let offset = b.constant(f, offset, 8);
    b.op(f, Opcode::PtrSub, &[base, offset], 8).unwrap()
}

/// Emits `*(base + offset) = value` with a `size`-byte constant.
pub fn store_field(
    b: &mut ProgramBuilder,
    f: FunctionId,
    base: ValueId,
    offset: i64,
    value: i64,
    size: u8,
) -> OpId {
    let address = field(b, f, base, offset);
    let value = b.constant(f, value, size);
    b.store(f, address, value).unwrap()
}

/// The four-struct fixture.
///
/// ```c
/// struct inner { char c; int a; int b; int d; };
/// struct outer { char *buf; long len; struct inner *a; struct inner *b; };
///
/// void fill(struct outer *o) {
///     o->buf[0] = 0;
///     (void)o->len;
///     o->a->c = 1; o->a->a = 2; o->a->d = 3;
///     o->b->c = 4; o->b->b = 5;
/// }
/// ```
pub fn four_structs() -> (Program, FunctionId) {
    let mut b = ProgramBuilder::new();
    let f = b.function("fill", &[8]);
    let o = b.param(f, 0).unwrap();

    let buf = b.load(f, o, 8).unwrap();
    let zero = b.constant(f, 0, 1);
    b.store(f, buf, zero).unwrap();

    let len = field(&mut b, f, o, 8);
    b.load(f, len, 8).unwrap();

    let a_slot = field(&mut b, f, o, 0x10);
    let a = b.load(f, a_slot, 8).unwrap();
    store_field(&mut b, f, a, 0, 1, 1);
    store_field(&mut b, f, a, 4, 2, 4);
    store_field(&mut b, f, a, 12, 3, 4);

    let b_slot = field(&mut b, f, o, 0x18);
    let inner = b.load(f, b_slot, 8).unwrap();
    store_field(&mut b, f, inner, 0, 4, 1);
    store_field(&mut b, f, inner, 8, 5, 4);

    b.ret(f, &[]).unwrap();
    (b.build(), f)
}

/// `for (i = 0; ; i += step) p[i] = 0;` over `elem`-byte elements.
///
/// Returns the program, the function and the store inside the loop.
pub fn counting_loop(elem: i64, step: i64) -> (Program, FunctionId, OpId) {
    let mut b = ProgramBuilder::new();
    let f = b.function("fill", &[8]);
    let p = b.param(f, 0).unwrap();
    let zero = b.constant(f, 0, 8);
    let step = b.constant(f, step, 8);
    let size = b.constant(f, elem, 8);
    let i = b.phi(f, 8).unwrap();
    let next = b.op(f, Opcode::Add, &[i, step], 8).unwrap();
    b.add_phi_input(i, zero).unwrap();
    b.add_phi_input(i, next).unwrap();
    let slot = b.op(f, Opcode::PtrAdd, &[p, i, size], 8).unwrap();
    let value = b.constant(f, 0, elem as u8);
    let store = b.store(f, slot, value).unwrap();
    (b.build(), f, store)
}
