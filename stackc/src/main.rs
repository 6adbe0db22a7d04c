use std::{collections::HashMap, fmt};

use clap::Parser;
use env_logger::Env;
use stackc::{
    BlockKind, CompilationContext, ContextCreateInfo, DataType, DefinitionFlags, DiagnosticMode,
    Field, Location, Operation, ProcId, Token,
};

/// Builds a small hard-coded program through the compilation context and
/// prints what a backend would receive.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Keep going after an error instead of exiting.
    #[arg(long)]
    keep_going: bool,

    #[arg(long)]
    no_color: bool,

    /// Print every emitted instruction.
    #[arg(long)]
    dump: bool,

    /// Log level: -v for debug, -vv for trace.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone)]
enum Op {
    Proc(Option<ProcId>),
    Push(i64),
    PushMemory(usize),
    Call(ProcId),
    If,
    End,
}

impl Operation for Op {
    fn procedure(&self) -> Option<ProcId> {
        match self {
            Op::Proc(id) => *id,
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Proc(Some(id)) => write!(f, "proc #{}", id.0),
            Op::Proc(None) => f.write_str("proc ?"),
            Op::Push(value) => write!(f, "push {value}"),
            Op::PushMemory(offset) => write!(f, "mem +{offset}"),
            Op::Call(id) => write!(f, "call #{}", id.0),
            Op::If => f.write_str("if"),
            Op::End => f.write_str("end"),
        }
    }
}

fn token(text: &str, line: usize) -> Token {
    Token::new(text, Location::new("demo.stk", line, 1))
}

fn define_proc(
    ctx: &mut CompilationContext<Op>,
    name: &str,
    line: usize,
    in_stack: Vec<DataType>,
) -> Option<ProcId> {
    let ip = ctx.new_instruction(Op::Proc(None));
    let block = ctx.open_block(BlockKind::Proc);
    let result = ctx.define_procedure(&token(name, line), in_stack, Vec::new(), block);
    let id = ctx.check(result)?;
    if let Some(op) = ctx.instruction_mut(ip) {
        *op = Op::Proc(Some(id));
    }
    Some(id)
}

fn end_proc(ctx: &mut CompilationContext<Op>) {
    ctx.new_instruction(Op::End);
    let result = ctx.close_block();
    if let Some(block) = ctx.check(result) {
        let result = ctx.get_procedure_by_block(&block);
        if let Some(id) = ctx.check(result) {
            ctx.procs.get_mut(id).block = block;
        }
    }
    ctx.leave_procedure();
}

fn demo_compiled(ctx: &mut CompilationContext<Op>) -> Option<()> {
    let result = ctx.define_struct(
        &token("Shape", 1),
        vec![Field::new("width", DataType::Int)],
        None,
        HashMap::new(),
    );
    let shape = ctx.check(result)?;
    let result = ctx.define_struct(&token("Square", 2), Vec::new(), Some(shape), HashMap::new());
    let square = ctx.check(result)?;

    ctx.owner = Some(shape);
    let area = define_proc(ctx, "area", 3, Vec::new())?;
    ctx.enter_procedure(area);
    ctx.new_instruction(Op::Push(2));
    end_proc(ctx);
    ctx.owner = None;

    let result = ctx.allocate_memory(&token("counter", 6), 4);
    let counter = ctx.check(result)?;

    let helper = define_proc(ctx, "helper", 7, vec![DataType::Int])?;
    ctx.enter_procedure(helper);
    ctx.new_instruction(Op::PushMemory(counter.offset));
    ctx.new_instruction(Op::Call(area));
    ctx.add_proc_use(area);
    end_proc(ctx);

    let unused = define_proc(ctx, "unused", 10, Vec::new())?;
    ctx.enter_procedure(unused);
    ctx.new_instruction(Op::Call(helper));
    ctx.add_proc_use(helper);
    end_proc(ctx);

    ctx.flags |= DefinitionFlags::NAMED;
    let main = define_proc(ctx, "main", 13, Vec::new())?;
    ctx.flags = DefinitionFlags::empty();
    ctx.enter_procedure(main);
    ctx.new_instruction(Op::Push(1));
    ctx.new_instruction(Op::If);
    ctx.open_block(BlockKind::If);
    ctx.new_instruction(Op::Push(3));
    ctx.new_instruction(Op::Call(helper));
    ctx.add_proc_use(helper);
    ctx.new_instruction(Op::End);
    let result = ctx.close_block();
    ctx.check(result)?;
    end_proc(ctx);

    ctx.new_instruction(Op::Call(main));
    ctx.add_proc_use(main);

    log::debug!(
        "Square inherits area: {}",
        ctx.types.get(square).method("area") == Some(area)
    );
    Some(())
}

fn main() {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .init();

    let diagnostics = if args.keep_going {
        DiagnosticMode::Collect
    } else {
        DiagnosticMode::Fatal
    };
    let mut ctx = CompilationContext::new(&ContextCreateInfo {
        diagnostics,
        color: !args.no_color,
        ..Default::default()
    });

    demo_compiled(&mut ctx);

    let errors = ctx.reporter().error_count();
    let program = match ctx.into_program() {
        Ok(program) => program,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    println!("instructions: {}", program.instructions.len());
    if args.dump {
        for (ip, op) in program.instructions.iter().enumerate() {
            println!("  {ip:>4}  {op}");
        }
    }
    for procedure in program.procs.iter() {
        let state = if program.used_procs.contains(&procedure.id) {
            "used"
        } else {
            "dead"
        };
        println!(
            "  {:<8} {state} ip={} body={}..{}",
            procedure.name,
            procedure.ip,
            procedure.block.start,
            procedure.block.end.map_or("?".to_owned(), |e| e.to_string()),
        );
    }
    println!("global memory: {} bytes", program.namespace.memory.size());

    if errors > 0 {
        std::process::exit(1);
    }
}
