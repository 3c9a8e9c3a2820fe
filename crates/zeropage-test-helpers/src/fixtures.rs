//! Small programs exercising one analysis concern each.
//!
//! Every fixture records the expressions and statements its tests need
//! under a label, so assertions read `fixture.expr("sum")` instead of
//! threading ids out of the builder.

use std::collections::BTreeMap;
use zeropage_core::ast::{BinaryOp, Intrinsic, ProgramBuilder, Type};
use zeropage_core::symbols::{StorageClass, SymbolId};
use zeropage_core::{ExprId, Program, StmtId, SymbolTable};

pub struct Fixture {
    pub program: Program,
    pub symbols: SymbolTable,
    exprs: BTreeMap<&'static str, ExprId>,
    stmts: BTreeMap<&'static str, StmtId>,
}

impl Fixture {
    fn new(builder: ProgramBuilder) -> Self {
        let (program, symbols) = builder.finish();
        Fixture {
            program,
            symbols,
            exprs: BTreeMap::new(),
            stmts: BTreeMap::new(),
        }
    }

    fn with_expr(mut self, label: &'static str, expr: ExprId) -> Self {
        self.exprs.insert(label, expr);
        self
    }

    fn with_stmt(mut self, label: &'static str, stmt: StmtId) -> Self {
        self.stmts.insert(label, stmt);
        self
    }

    /// Symbol by name. Fixture names are unique across scopes.
    pub fn symbol(&self, name: &str) -> SymbolId {
        self.symbols
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.id)
            .unwrap_or_else(|| panic!("fixture has no symbol '{}'", name))
    }

    pub fn expr(&self, label: &str) -> ExprId {
        *self
            .exprs
            .get(label)
            .unwrap_or_else(|| panic!("fixture has no expression '{}'", label))
    }

    pub fn stmt(&self, label: &str) -> StmtId {
        *self
            .stmts
            .get(label)
            .unwrap_or_else(|| panic!("fixture has no statement '{}'", label))
    }
}

/// `let x = 2; let y = 3; let z = x + y; return z;`
pub fn constant_chain() -> Fixture {
    let mut b = ProgramBuilder::new();
    let main = b.declare_function("main", Type::Byte);
    let x = b.local(main, "x", Type::Byte);
    let y = b.local(main, "y", Type::Byte);
    let z = b.local(main, "z", Type::Byte);
    let two = b.byte(2);
    let dx = b.declare(x, Some(two));
    let three = b.byte(3);
    let dy = b.declare(y, Some(three));
    let (rx, ry) = (b.var(x), b.var(y));
    let sum = b.binary(BinaryOp::Add, rx, ry);
    let dz = b.declare(z, Some(sum));
    let rz = b.var(z);
    let ret = b.ret(Some(rz));
    b.set_body(main, vec![dx, dy, dz, ret]);
    Fixture::new(b)
        .with_expr("sum", sum)
        .with_expr("z_use", rz)
        .with_stmt("z_decl", dz)
}

/// The chain above with `if flag { x = 7; }` between `x` and its use.
pub fn conditional_reassign() -> Fixture {
    let mut b = ProgramBuilder::new();
    let main = b.declare_function("main", Type::Byte);
    let flag = b.param(main, "flag", Type::Bool);
    let x = b.local(main, "x", Type::Byte);
    let y = b.local(main, "y", Type::Byte);
    let z = b.local(main, "z", Type::Byte);
    let two = b.byte(2);
    let dx = b.declare(x, Some(two));
    let seven = b.byte(7);
    let reassign = b.assign(x, seven);
    let cond = b.var(flag);
    let branch = b.if_stmt(cond, vec![reassign], None);
    let three = b.byte(3);
    let dy = b.declare(y, Some(three));
    let (rx, ry) = (b.var(x), b.var(y));
    let sum = b.binary(BinaryOp::Add, rx, ry);
    let dz = b.declare(z, Some(sum));
    let rz = b.var(z);
    let ret = b.ret(Some(rz));
    b.set_body(main, vec![dx, branch, dy, dz, ret]);
    Fixture::new(b)
        .with_expr("x_use", rx)
        .with_expr("sum", sum)
        .with_stmt("z_decl", dz)
}

/// `let b = @target; let a = b;`
pub fn pointer_copy() -> Fixture {
    let mut b = ProgramBuilder::new();
    let target = b.global("target", Type::Byte);
    let main = b.declare_function("main", Type::Void);
    let pb = b.local(main, "b", Type::Word);
    let pa = b.local(main, "a", Type::Word);
    let addr = b.address_of(target);
    let db = b.declare(pb, Some(addr));
    let rb = b.var(pb);
    let da = b.declare(pa, Some(rb));
    b.set_body(main, vec![db, da]);
    Fixture::new(b).with_stmt("copy", da)
}

/// `let a = @g; let b = a; a = b; b = a;`
pub fn cyclic_copies() -> Fixture {
    let mut b = ProgramBuilder::new();
    let g = b.global("g", Type::Byte);
    let main = b.declare_function("main", Type::Void);
    let a = b.local(main, "a", Type::Word);
    let c = b.local(main, "b", Type::Word);
    let addr = b.address_of(g);
    let da = b.declare(a, Some(addr));
    let ra = b.var(a);
    let dc = b.declare(c, Some(ra));
    let rc = b.var(c);
    let s1 = b.assign(a, rc);
    let ra2 = b.var(a);
    let s2 = b.assign(c, ra2);
    b.set_body(main, vec![da, dc, s1, s2]);
    Fixture::new(b)
}

/// A store into the code segment next to a store into VIC-II registers.
pub fn self_modifying_store() -> Fixture {
    let mut b = ProgramBuilder::new();
    let main = b.declare_function("main", Type::Void);
    let code = b.word(0x0810);
    let nop = b.byte(0xEA);
    let patch = b.intrinsic(Intrinsic::Poke, vec![code, nop]);
    let code_store = b.expr_stmt(patch);
    let border = b.word(0xD020);
    let black = b.byte(0);
    let io = b.intrinsic(Intrinsic::Poke, vec![border, black]);
    let io_store = b.expr_stmt(io);
    b.set_body(main, vec![code_store, io_store]);
    Fixture::new(b)
        .with_stmt("code_store", code_store)
        .with_stmt("io_store", io_store)
}

/// `return; x = 1;`
pub fn unreachable_after_return() -> Fixture {
    let mut b = ProgramBuilder::new();
    let main = b.declare_function("main", Type::Void);
    let x = b.local(main, "x", Type::Byte);
    let decl = b.declare(x, None);
    let ret = b.ret(None);
    let one = b.byte(1);
    let dead = b.assign(x, one);
    b.set_body(main, vec![decl, ret, dead]);
    Fixture::new(b).with_stmt("return", ret).with_stmt("dead", dead)
}

/// `if flag { return 1; } else { return 2; } return 3;`
pub fn unreachable_after_if_else() -> Fixture {
    let mut b = ProgramBuilder::new();
    let main = b.declare_function("main", Type::Byte);
    let flag = b.param(main, "flag", Type::Bool);
    let one = b.byte(1);
    let r1 = b.ret(Some(one));
    let two = b.byte(2);
    let r2 = b.ret(Some(two));
    let cond = b.var(flag);
    let branch = b.if_stmt(cond, vec![r1], Some(vec![r2]));
    let three = b.byte(3);
    let dead = b.ret(Some(three));
    b.set_body(main, vec![branch, dead]);
    Fixture::new(b).with_stmt("branch", branch).with_stmt("dead", dead)
}

/// `good` is well formed; `bad` assigns to a symbol missing from the table.
pub fn two_functions_one_malformed() -> Fixture {
    let mut b = ProgramBuilder::new();
    let good = b.declare_function("good", Type::Byte);
    let x = b.local(good, "x", Type::Byte);
    let four = b.byte(4);
    let dx = b.declare(x, Some(four));
    let rx = b.var(x);
    let ret = b.ret(Some(rx));
    b.set_body(good, vec![dx, ret]);
    b.set_exported(good, true);

    let bad = b.declare_function("bad", Type::Void);
    let ghost = b.dangling_symbol();
    let one = b.byte(1);
    let broken = b.assign(ghost, one);
    b.set_body(bad, vec![broken]);
    b.set_exported(bad, true);
    Fixture::new(b).with_expr("x_use", rx).with_stmt("x_decl", dx)
}

/// `for i = 0 to 9 { for j = 0 to 4 { grid[j] = i; } }`
pub fn nested_loops() -> Fixture {
    let mut b = ProgramBuilder::new();
    let grid = b.global("grid", Type::array(Type::Byte, 5));
    let main = b.declare_function("main", Type::Void);
    let i = b.local(main, "i", Type::Byte);
    let j = b.local(main, "j", Type::Byte);
    let rj = b.var(j);
    let ri = b.var(i);
    let store = b.assign_index(grid, rj, ri);
    let (zero, four) = (b.byte(0), b.byte(4));
    let inner = b.for_stmt(j, zero, four, None, vec![store]);
    let (zero, nine) = (b.byte(0), b.byte(9));
    let outer = b.for_stmt(i, zero, nine, None, vec![inner]);
    b.set_body(main, vec![outer]);
    Fixture::new(b)
        .with_stmt("outer", outer)
        .with_stmt("inner", inner)
        .with_stmt("store", store)
}

/// `main` calls `fact` (recursive) and `set_border` (hardware write);
/// `orphan` is never called; `api` is exported.
pub fn call_hierarchy() -> Fixture {
    let mut b = ProgramBuilder::new();
    let border = b.mapped("border", Type::Byte, 0xD020);
    let counter = b.global_in("counter", Type::Byte, StorageClass::ZeroPage);

    let fact = b.declare_function("fact", Type::Word);
    let n = b.param(fact, "n", Type::Byte);
    let rn = b.var(n);
    let one = b.byte(1);
    let base = b.binary(BinaryOp::Le, rn, one);
    let w1 = b.word(1);
    let r_base = b.ret(Some(w1));
    let guard = b.if_stmt(base, vec![r_base], None);
    let rn2 = b.var(n);
    let one2 = b.byte(1);
    let dec = b.binary(BinaryOp::Sub, rn2, one2);
    let recurse = b.call(fact.symbol, vec![dec]);
    let rn3 = b.var(n);
    let product = b.binary(BinaryOp::Mul, rn3, recurse);
    let r = b.ret(Some(product));
    b.set_body(fact, vec![guard, r]);

    let set_border = b.declare_function("set_border", Type::Void);
    let colour = b.param(set_border, "colour", Type::Byte);
    let rc = b.var(colour);
    let s = b.assign(border, rc);
    b.set_body(set_border, vec![s]);

    let tick = b.declare_function("tick", Type::Void);
    let rcount = b.var(counter);
    let one3 = b.byte(1);
    let inc = b.binary(BinaryOp::Add, rcount, one3);
    let s = b.assign(counter, inc);
    b.set_body(tick, vec![s]);

    let orphan = b.declare_function("orphan", Type::Void);
    b.set_body(orphan, vec![]);

    let api = b.declare_function("api", Type::Byte);
    let seven = b.byte(7);
    let r = b.ret(Some(seven));
    b.set_body(api, vec![r]);
    b.set_exported(api, true);

    let main = b.declare_function("main", Type::Void);
    let five = b.byte(5);
    let c1 = b.call(fact.symbol, vec![five]);
    let s1 = b.expr_stmt(c1);
    let c2 = b.call(tick.symbol, vec![]);
    let s2 = b.expr_stmt(c2);
    let two = b.byte(2);
    let c3 = b.call(set_border.symbol, vec![two]);
    let s3 = b.expr_stmt(c3);
    b.set_body(main, vec![s1, s2, s3]);

    Fixture::new(b)
        .with_expr("recurse", recurse)
        .with_expr("call_set_border", c3)
}
