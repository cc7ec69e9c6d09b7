//! End-to-end scenarios driving the parser, optimization pipeline, and
//! assembler together over small textual IR programs.

use venom_ir::analysis::AnalysesCache;
use venom_ir::codegen::assemble;
use venom_ir::config::TargetConfig;
use venom_ir::ir::Label;
use venom_ir::parser::parse_context;
use venom_ir::passes::run_default_pipeline;
use venom_ir::stack::Asm;

fn compile(src: &str, entry: &str) -> Vec<Asm> {
    let mut ctx = parse_context(src).expect("parses");
    let label = Label::new(entry);
    let func = ctx.get_function_mut(&label).expect("function exists");
    let mut cache = AnalysesCache::new();
    run_default_pipeline(func, &mut cache).expect("pipeline runs");
    assemble(func, TargetConfig::default(), &mut cache).expect("assembles")
}

fn mnemonics(asm: &[Asm]) -> Vec<&'static str> {
    asm.iter()
        .filter_map(|a| match a {
            Asm::Mnemonic(m) => Some(*m),
            _ => None,
        })
        .collect()
}

#[test]
fn simple_arithmetic_fold_eliminates_the_add() {
    let src = "function main { main: %1 = add 10, 32\n stop }";
    let asm = compile(src, "main");
    assert!(!asm.iter().any(|a| matches!(a, Asm::Mnemonic("ADD"))));
    assert!(asm.iter().any(|a| matches!(a, Asm::Mnemonic("STOP"))));
}

#[test]
fn branch_elimination_removes_the_dead_target() {
    let src = "\
function main {
main:
    %1 = 1
    jnz %1, @t, @f
t:
    stop
f:
    stop
}";
    let asm = compile(src, "main");
    assert!(!mnemonics(&asm).contains(&"JUMPI"));
    let f_labels = asm.iter().filter(|a| matches!(a, Asm::Label(l) if l.name() == "f")).count();
    assert_eq!(f_labels, 0, "unreachable block f must not reach emission");
}

#[test]
fn load_elimination_across_a_known_store() {
    let src = "\
function main {
main:
    mstore 10, 0
    %1 = mload 10
    return %1, 32
}";
    let asm = compile(src, "main");
    assert!(!mnemonics(&asm).contains(&"MLOAD"));
    assert!(mnemonics(&asm).contains(&"RETURN"));
}

#[test]
fn write_after_write_order_is_preserved() {
    let src = "\
function main {
main:
    sstore 0, %x
    %y2 = mul %y, 2
    sstore 1, %y2
    sstore 0, %y2
    stop
}";
    let mut ctx = parse_context(src).expect("parses");
    let label = Label::new("main");
    let func = ctx.get_function_mut(&label).expect("function exists");
    let mut cache = AnalysesCache::new();
    run_default_pipeline(func, &mut cache).expect("pipeline runs");

    let sstore_count = func
        .entry()
        .instructions
        .iter()
        .filter(|i| i.opcode == venom_ir::ir::Opcode::SStore)
        .count();
    assert_eq!(sstore_count, 3, "no sstore was eliminated or reordered away");
}

#[test]
fn deep_stack_swap_reaches_a_buried_operand() {
    let mut src = String::from("function main {\nmain:\n");
    for i in 0..40 {
        src.push_str(&format!("    %v{i} = add {i}, 1\n"));
    }
    src.push_str("    %r = add %v0, %v22\n");
    src.push_str("    return %r, 32\n}\n");

    let asm = compile(&src, "main");
    assert!(mnemonics(&asm).contains(&"RETURN"));
}

#[test]
fn round_trips_through_print_and_parse() {
    let src = "function main { main: %1 = add 10, 32\n stop }";
    let ctx = parse_context(src).expect("parses");
    let printed = venom_ir::printer::print_context(&ctx);
    let reparsed = parse_context(&printed).expect("reparses own output");
    assert_eq!(ctx.functions().count(), reparsed.functions().count());
}
