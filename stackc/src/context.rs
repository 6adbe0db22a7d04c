use std::collections::{HashMap, HashSet, VecDeque};

use bitflags::bitflags;

use crate::{
    Binding, Block, BlockKind, BlockStack, CompileError, CompileResult, ContextCreateInfo, DataType,
    DiagnosticReporter, EntityKind, ErrorKind, Field, GlobalNamespace, Location, Memory, ProcId,
    ProcedureInfo, ProcedureRegistry, StructId, StructInfo, Token, TokenSource, TypeHierarchy,
    reachability,
};

/// The one thing the context needs to know about an emitted operation.
pub trait Operation {
    /// The procedure defined by this operation, if it opens one.
    fn procedure(&self) -> Option<ProcId>;
}

bitflags! {
    /// What kind of definition the parser is currently inside.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DefinitionFlags: u8 {
        /// Structs defined now can be unpacked onto the stack.
        const UNPACK = 1 << 0;
        /// Inside a constructor.
        const INIT = 1 << 1;
        /// Methods defined now are static.
        const STATIC = 1 << 2;
        /// Procedures defined now take named arguments.
        const NAMED = 1 << 3;
    }
}

/// The part of the context a parsing detour may replace.
#[derive(Debug)]
pub struct Snapshot {
    blocks: BlockStack,
    tokens: TokenSource,
    token_queue: VecDeque<Token>,
    location: Location,
}

/// Everything a backend consumes once compilation has finished.
#[derive(Debug)]
pub struct CompiledProgram<O> {
    pub instructions: Vec<O>,
    pub namespace: GlobalNamespace,
    pub types: TypeHierarchy,
    pub procs: ProcedureRegistry,
    pub used_procs: HashSet<ProcId>,
    pub string_data: Vec<Vec<u8>>,
}

/// Compile-time state of a single compilation.
///
/// The parser feeds it tokens and operations and registers entities
/// through it. Operations that can violate an invariant return a
/// [`CompileError`] tagged with the current location; the caller decides
/// whether to hand it to [`CompilationContext::report`].
#[derive(Debug)]
pub struct CompilationContext<O> {
    pub namespace: GlobalNamespace,
    pub types: TypeHierarchy,
    pub procs: ProcedureRegistry,
    /// Variables bound at top level.
    pub variables: HashMap<String, Binding>,

    pub flags: DefinitionFlags,
    /// Struct whose body is being parsed, for method definitions.
    pub owner: Option<StructId>,

    pub bind_stack: Vec<Binding>,
    pub bind_stack_size: usize,
    pub route_stack: Vec<(String, Vec<DataType>)>,
    pub do_stack: Vec<Vec<O>>,

    blocks: BlockStack,
    tokens: TokenSource,
    token_queue: VecDeque<Token>,
    location: Location,

    instructions: Vec<O>,
    current_proc: Option<ProcId>,

    compile_ifs_opened: usize,
    false_compile_ifs: usize,

    string_data: Vec<Vec<u8>>,
    used_procs: Option<HashSet<ProcId>>,
    reporter: DiagnosticReporter,
}

impl<O> CompilationContext<O> {
    pub fn new(info: &ContextCreateInfo) -> Self {
        let reporter = DiagnosticReporter::new(info.diagnostics, info.color);
        Self::with_reporter(info, reporter)
    }

    pub fn with_reporter(info: &ContextCreateInfo, reporter: DiagnosticReporter) -> Self {
        Self {
            namespace: GlobalNamespace::new(info.syscall_count, info.memory_alignment),
            types: TypeHierarchy::new(),
            procs: ProcedureRegistry::new(info.memory_alignment),
            variables: HashMap::new(),
            flags: DefinitionFlags::empty(),
            owner: None,
            bind_stack: Vec::new(),
            bind_stack_size: 0,
            route_stack: Vec::new(),
            do_stack: Vec::new(),
            blocks: BlockStack::new(),
            tokens: TokenSource::empty(),
            token_queue: VecDeque::new(),
            location: Location::unknown(),
            instructions: Vec::with_capacity(info.instruction_capacity),
            current_proc: None,
            compile_ifs_opened: 0,
            false_compile_ifs: 0,
            string_data: Vec::new(),
            used_procs: None,
            reporter,
        }
    }

    // diagnostics

    /// Builds an error at the current location.
    #[must_use]
    pub fn error(&self, kind: ErrorKind) -> CompileError {
        CompileError::new(self.location.clone(), kind)
    }

    /// Hands `error` to the reporter. Exits the process in fatal mode.
    pub fn report(&mut self, error: &CompileError) {
        self.reporter.report(error);
    }

    pub fn report_nonfatal(&mut self, error: &CompileError) {
        self.reporter.report_nonfatal(error);
    }

    /// Unwraps `result`, reporting the error if there is one.
    pub fn check<T>(&mut self, result: CompileResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                self.report(&error);
                None
            }
        }
    }

    #[must_use]
    pub fn reporter(&self) -> &DiagnosticReporter {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut DiagnosticReporter {
        &mut self.reporter
    }

    // tokens

    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn set_location(&mut self, location: Location) {
        self.location = location;
    }

    pub fn set_tokens(&mut self, tokens: TokenSource) {
        self.tokens = tokens;
    }

    /// Next token from the lookahead queue, then from the source. Moves
    /// the current location to the returned token.
    pub fn next_token(&mut self) -> Option<Token> {
        let token = self
            .token_queue
            .pop_front()
            .or_else(|| self.tokens.next())?;
        self.location = token.location.clone();
        Some(token)
    }

    /// Looks at the next token without consuming it.
    pub fn peek_token(&mut self) -> Option<&Token> {
        if self.token_queue.is_empty() {
            let token = self.tokens.next()?;
            self.token_queue.push_back(token);
        }
        self.token_queue.front()
    }

    /// Queues `token` to be returned after the already queued ones, before
    /// anything left in the source.
    pub fn queue_token(&mut self, token: Token) {
        self.token_queue.push_back(token);
    }

    /// Puts `token` back so it is the next one returned.
    pub fn unread_token(&mut self, token: Token) {
        self.token_queue.push_front(token);
    }

    #[must_use]
    pub fn token_queue(&self) -> &VecDeque<Token> {
        &self.token_queue
    }

    // snapshots

    /// Captures the block stack, token source, lookahead queue, and
    /// location.
    ///
    /// The snapshot holds a handle to the live token source, which keeps
    /// working. Tokens pulled from it before the matching
    /// [`CompilationContext::restore`] stay consumed.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        log::trace!("snapshot at {} ({} open blocks)", self.location, self.blocks.len());
        Snapshot {
            blocks: self.blocks.clone(),
            tokens: self.tokens.clone(),
            token_queue: self.token_queue.clone(),
            location: self.location.clone(),
        }
    }

    /// Puts back exactly the four captured fields. Everything else keeps
    /// whatever the detour did to it.
    pub fn restore(&mut self, snapshot: Snapshot) {
        log::trace!("restore to {}", snapshot.location);
        self.blocks = snapshot.blocks;
        self.tokens = snapshot.tokens;
        self.token_queue = snapshot.token_queue;
        self.location = snapshot.location;
    }

    /// Starts parsing `tokens` in place of the current source. Pass the
    /// returned snapshot to [`CompilationContext::restore`] to resume.
    pub fn begin_detour(&mut self, tokens: TokenSource) -> Snapshot {
        let snapshot = self.snapshot();
        self.tokens = tokens;
        self.token_queue.clear();
        snapshot
    }

    // instructions

    /// Appends `op` and returns its instruction pointer.
    pub fn new_instruction(&mut self, op: O) -> usize {
        self.instructions.push(op);
        let ip = self.instructions.len() - 1;
        log::trace!("instruction {ip}");
        ip
    }

    /// Pointer of the most recently emitted instruction.
    #[must_use]
    pub fn current_ip(&self) -> Option<usize> {
        self.instructions.len().checked_sub(1)
    }

    #[must_use]
    pub fn instruction(&self, ip: usize) -> Option<&O> {
        self.instructions.get(ip)
    }

    pub fn instruction_mut(&mut self, ip: usize) -> Option<&mut O> {
        self.instructions.get_mut(ip)
    }

    #[must_use]
    pub fn instructions(&self) -> &[O] {
        &self.instructions
    }

    // blocks

    /// Opens a block starting at the current instruction.
    ///
    /// Before any instruction exists the block starts at 0, which is where
    /// the next emitted instruction lands. Emit the opening operation first
    /// if [`CompilationContext::get_procedure_by_block`] has to find it.
    pub fn open_block(&mut self, kind: BlockKind) -> Block {
        let ip = self.current_ip().unwrap_or(0);
        self.blocks.open(kind, ip)
    }

    /// Closes the innermost block with `end`, ending it at the current
    /// instruction.
    pub fn close_block(&mut self) -> CompileResult<Block> {
        self.close_block_with("end")
    }

    /// Closes the innermost block with `closing`, ending it at the current
    /// instruction, or at 0 if nothing has been emitted yet.
    pub fn close_block_with(&mut self, closing: &str) -> CompileResult<Block> {
        let ip = self.current_ip().unwrap_or(0);
        self.blocks
            .close_with(closing, ip)
            .map_err(|kind| self.error(kind))
    }

    #[must_use]
    pub fn peek_block_kind(&self) -> Option<BlockKind> {
        self.blocks.peek_kind()
    }

    #[must_use]
    pub fn blocks(&self) -> &BlockStack {
        &self.blocks
    }

    // conditional compilation

    pub fn enter_compile_if(&mut self, condition: bool) {
        self.compile_ifs_opened += 1;
        if self.false_compile_ifs > 0 || !condition {
            self.false_compile_ifs += 1;
        }
    }

    pub fn leave_compile_if(&mut self) -> CompileResult<()> {
        if self.compile_ifs_opened == 0 {
            return Err(self.error(ErrorKind::UnbalancedCompileIf));
        }
        self.compile_ifs_opened -= 1;
        // false regions are always the innermost ones
        self.false_compile_ifs = self.false_compile_ifs.saturating_sub(1);
        Ok(())
    }

    /// Tokens are being skipped by a false conditional region.
    #[must_use]
    pub fn is_skipping(&self) -> bool {
        self.false_compile_ifs > 0
    }

    #[must_use]
    pub fn compile_if_depth(&self) -> usize {
        self.compile_ifs_opened
    }

    // names

    /// Fails if `token` cannot name a new entity of `kind`. Moves the
    /// current location to the token.
    pub fn check_name(&mut self, token: &Token, kind: EntityKind) -> CompileResult<()> {
        self.location = token.location.clone();
        self.namespace
            .check_name(&token.text, kind)
            .map_err(|kind| self.error(kind))
    }

    pub fn define_constant(&mut self, token: &Token, value: i64) -> CompileResult<()> {
        self.location = token.location.clone();
        self.namespace
            .define_constant(&token.text, value)
            .map_err(|kind| self.error(kind))
    }

    pub fn define_enum(&mut self, token: &Token, variants: Vec<String>) -> CompileResult<()> {
        self.location = token.location.clone();
        self.namespace
            .define_enum(&token.text, variants)
            .map_err(|kind| self.error(kind))
    }

    /// Allocates a memory region in the current procedure, or globally at
    /// top level.
    pub fn allocate_memory(&mut self, token: &Token, size: usize) -> CompileResult<Memory> {
        self.check_name(token, EntityKind::Memory)?;

        let Some(id) = self.current_proc else {
            return Ok(self.namespace.memory.allocate(&token.text, size));
        };

        let scope = &mut self.procs.get_mut(id).memories;
        if scope.contains(&token.text) {
            return Err(self.error(ErrorKind::NameCollision {
                kind: EntityKind::Memory,
                name: token.text.clone(),
            }));
        }
        Ok(scope.allocate(&token.text, size))
    }

    /// Finds a memory, looking in the current procedure first.
    #[must_use]
    pub fn lookup_memory(&self, name: &str) -> Option<&Memory> {
        self.current_proc
            .and_then(|id| self.procs.get(id).memories.get(name))
            .or_else(|| self.namespace.memory(name))
    }

    /// Binds a variable in the current procedure, or globally at top level.
    pub fn bind_variable(&mut self, binding: Binding) {
        log::debug!("variable {} : {}", binding.name, binding.ty);
        let variables = match self.current_proc {
            Some(id) => &mut self.procs.get_mut(id).variables,
            None => &mut self.variables,
        };
        variables.insert(binding.name.clone(), binding);
    }

    #[must_use]
    pub fn lookup_variable(&self, name: &str) -> Option<&Binding> {
        self.current_proc
            .and_then(|id| self.procs.get(id).variables.get(name))
            .or_else(|| self.variables.get(name))
    }

    // structs and procedures

    /// Defines a struct. Its unpackability comes from the current
    /// [`DefinitionFlags::UNPACK`] mode.
    pub fn define_struct(
        &mut self,
        token: &Token,
        fields: Vec<Field>,
        parent: Option<StructId>,
        defaults: HashMap<usize, Token>,
    ) -> CompileResult<StructId> {
        self.check_name(token, EntityKind::Struct)?;
        let id = self.types.define_struct(StructInfo {
            name: token.text.clone(),
            fields,
            parent,
            defaults,
            is_unpackable: self.flags.contains(DefinitionFlags::UNPACK),
        });
        self.namespace.insert_struct(&token.text, id);
        Ok(id)
    }

    /// Defines a procedure whose body is `block`.
    ///
    /// With an [`owner`](Self::owner) set, the procedure becomes a method
    /// of it (static under [`DefinitionFlags::STATIC`]) and is not added to
    /// the global namespace.
    pub fn define_procedure(
        &mut self,
        token: &Token,
        in_stack: Vec<DataType>,
        out_stack: Vec<DataType>,
        block: Block,
    ) -> CompileResult<ProcId> {
        let kind = if self.owner.is_some() {
            EntityKind::Method
        } else {
            EntityKind::Procedure
        };
        self.location = token.location.clone();

        if self.owner.is_some() {
            if self.namespace.is_reserved(&token.text) {
                return Err(self.error(ErrorKind::ReservedName {
                    kind,
                    name: token.text.clone(),
                }));
            }
        } else {
            self.check_name(token, kind)?;
        }

        let info = ProcedureInfo {
            name: token.text.clone(),
            ip: block.start,
            in_stack,
            out_stack,
            block,
            is_named: self.flags.contains(DefinitionFlags::NAMED),
            owner: self.owner,
        };

        let id = match self.owner {
            Some(owner) if self.flags.contains(DefinitionFlags::STATIC) => {
                self.procs.define_static_method(owner, info, &mut self.types)
            }
            Some(_) => self.procs.define_procedure(info, &mut self.types),
            None => {
                let id = self.procs.define_procedure(info, &mut self.types);
                self.namespace.insert_procedure(&token.text, id);
                id
            }
        };
        Ok(id)
    }

    pub fn enter_procedure(&mut self, id: ProcId) {
        log::trace!("enter {}", self.procs.get(id).name);
        self.current_proc = Some(id);
    }

    pub fn leave_procedure(&mut self) -> Option<ProcId> {
        self.current_proc.take()
    }

    #[must_use]
    pub fn current_procedure(&self) -> Option<ProcId> {
        self.current_proc
    }

    /// Records a reference to `callee` from wherever parsing currently is.
    pub fn add_proc_use(&mut self, callee: ProcId) {
        self.procs.record_call(self.current_proc, callee);
    }

    // literal data

    /// Adds a literal to the data pool and returns its index.
    pub fn add_string_data(&mut self, bytes: impl Into<Vec<u8>>) -> usize {
        self.string_data.push(bytes.into());
        self.string_data.len() - 1
    }

    #[must_use]
    pub fn string_data(&self) -> &[Vec<u8>] {
        &self.string_data
    }

    // analysis

    /// Computes the procedures reachable from top-level code.
    pub fn compute_used_procs(&mut self) -> &HashSet<ProcId> {
        let used = reachability::compute_used(
            self.procs.top_level_uses().iter().copied(),
            &self.procs,
        );
        log::info!("{} of {} procedures are used", used.len(), self.procs.len());
        self.used_procs.insert(used)
    }

    /// The result of the last [`CompilationContext::compute_used_procs`].
    #[must_use]
    pub fn used_procs(&self) -> Option<&HashSet<ProcId>> {
        self.used_procs.as_ref()
    }

    /// Checks the end-of-input invariants.
    pub fn finish(&self) -> CompileResult<()> {
        self.blocks.ensure_empty().map_err(|kind| self.error(kind))?;
        if self.compile_ifs_opened > 0 {
            return Err(self.error(ErrorKind::UnclosedCompileIf {
                count: self.compile_ifs_opened,
            }));
        }
        Ok(())
    }

    /// Validates the end state, runs reachability, and hands everything
    /// over for code generation.
    pub fn into_program(mut self) -> CompileResult<CompiledProgram<O>> {
        self.finish()?;
        self.compute_used_procs();
        Ok(CompiledProgram {
            instructions: self.instructions,
            namespace: self.namespace,
            types: self.types,
            procs: self.procs,
            used_procs: self.used_procs.unwrap_or_default(),
            string_data: self.string_data,
        })
    }
}

impl<O: Operation> CompilationContext<O> {
    /// The procedure defined by the operation at `block.start`.
    pub fn get_procedure_by_block(&self, block: &Block) -> CompileResult<ProcId> {
        self.instruction(block.start)
            .and_then(|op| op.procedure())
            .ok_or_else(|| self.error(ErrorKind::NotAProcedureBlock { ip: block.start }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiagnosticMode;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Push(i64),
        Proc(Option<ProcId>),
        Call(ProcId),
        Return,
    }

    impl Operation for Op {
        fn procedure(&self) -> Option<ProcId> {
            match self {
                Op::Proc(id) => *id,
                _ => None,
            }
        }
    }

    fn context() -> CompilationContext<Op> {
        CompilationContext::new(&ContextCreateInfo {
            diagnostics: DiagnosticMode::Collect,
            color: false,
            ..Default::default()
        })
    }

    fn tok(text: &str, line: usize) -> Token {
        Token::new(text, Location::new("test.stk", line, 1))
    }

    fn tokens(words: &[&str]) -> TokenSource {
        let words: Vec<Token> = words
            .iter()
            .enumerate()
            .map(|(i, w)| tok(w, i + 1))
            .collect();
        TokenSource::from_tokens(words)
    }

    #[test]
    fn instruction_pointers_are_dense() {
        let mut ctx = context();
        assert_eq!(ctx.current_ip(), None);
        for i in 0..5 {
            let ip = ctx.new_instruction(Op::Push(i));
            assert_eq!(ip, i as usize);
            assert_eq!(ctx.instructions().len() - 1, ip);
            assert_eq!(ctx.current_ip(), Some(ip));
        }
        assert_eq!(ctx.instruction(3), Some(&Op::Push(3)));
    }

    #[test]
    fn tokens_come_from_queue_first() {
        let mut ctx = context();
        ctx.set_tokens(tokens(&["a", "b"]));

        assert_eq!(ctx.peek_token().map(|t| t.text.clone()), Some("a".into()));
        ctx.queue_token(tok("q", 10));
        ctx.unread_token(tok("u", 20));

        let order: Vec<String> =
            std::iter::from_fn(|| ctx.next_token().map(|t| t.text)).collect();
        assert_eq!(order, ["u", "a", "q", "b"]);
        assert_eq!(ctx.location().line, 2);
    }

    #[test]
    fn snapshot_restores_exactly_four_fields() {
        let mut ctx = context();
        ctx.set_tokens(tokens(&["outer1", "outer2", "outer3"]));
        let first = ctx.next_token().unwrap();
        ctx.new_instruction(Op::Push(0));
        ctx.open_block(BlockKind::Proc);
        ctx.queue_token(tok("queued", 40));

        let blocks_before = ctx.blocks().clone();
        let queue_before = ctx.token_queue().clone();
        let location_before = ctx.location().clone();
        assert_eq!(location_before, first.location);

        let snapshot = ctx.begin_detour(tokens(&["inner", "bind", "x"]));
        assert!(ctx.token_queue().is_empty());
        while ctx.next_token().is_some() {}
        ctx.new_instruction(Op::Push(1));
        ctx.open_block(BlockKind::Bind);
        ctx.define_constant(&tok("LIMIT", 9), 10).unwrap();
        ctx.add_string_data(b"hi".to_vec());
        ctx.bind_stack.push(Binding::new("x", DataType::Int));
        ctx.bind_stack_size += 1;
        ctx.restore(snapshot);

        assert_eq!(ctx.blocks(), &blocks_before);
        assert_eq!(ctx.token_queue(), &queue_before);
        assert_eq!(ctx.location(), &location_before);
        assert_eq!(ctx.instructions().len(), 2);
        assert_eq!(ctx.namespace.constant("LIMIT"), Some(10));
        assert_eq!(ctx.string_data(), &[b"hi".to_vec()]);
        assert_eq!(ctx.bind_stack.len(), ctx.bind_stack_size);
        assert_eq!(ctx.bind_stack_size, 1);

        let rest: Vec<String> =
            std::iter::from_fn(|| ctx.next_token().map(|t| t.text)).collect();
        assert_eq!(rest, ["queued", "outer2", "outer3"]);
    }

    #[test]
    fn snapshot_leaves_source_live() {
        let mut ctx = context();
        ctx.set_tokens(tokens(&["a", "b", "c"]));

        let snapshot = ctx.snapshot();
        assert_eq!(ctx.next_token().map(|t| t.text), Some("a".into()));
        assert_eq!(ctx.peek_token().map(|t| t.text.clone()), Some("b".into()));

        ctx.restore(snapshot);
        assert_eq!(ctx.location().line, 0);
        assert!(ctx.token_queue().is_empty());
        // the shared source already yielded "a" and "b"
        assert_eq!(ctx.next_token().map(|t| t.text), Some("c".into()));
        assert!(ctx.next_token().is_none());
    }

    #[test]
    fn nested_detours_unwind_in_order() {
        let mut ctx = context();
        ctx.set_tokens(tokens(&["a"]));

        let outer = ctx.begin_detour(tokens(&["b"]));
        let inner = ctx.begin_detour(tokens(&["c"]));
        assert_eq!(ctx.next_token().map(|t| t.text), Some("c".into()));
        ctx.restore(inner);
        assert_eq!(ctx.next_token().map(|t| t.text), Some("b".into()));
        ctx.restore(outer);
        assert_eq!(ctx.next_token().map(|t| t.text), Some("a".into()));
    }

    #[test]
    fn check_name_tags_token_location() {
        let mut ctx = context();
        ctx.define_constant(&tok("WIDTH", 1), 80).unwrap();

        let err = ctx
            .define_struct(&tok("WIDTH", 7), Vec::new(), None, HashMap::new())
            .unwrap_err();
        assert_eq!(err.location.line, 7);
        assert!(matches!(err.kind, ErrorKind::NameCollision { .. }));

        let err = ctx.check_name(&tok("if", 8), EntityKind::Enum).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::ReservedName {
                kind: EntityKind::Enum,
                name: "if".into()
            }
        );
        assert_eq!(err.to_string(), "Error test.stk:8:1: name for enum \"if\" is unavailable");
    }

    #[test]
    fn memory_follows_current_procedure() {
        let mut ctx = context();
        let global = ctx.allocate_memory(&tok("heap", 1), 12).unwrap();

        ctx.new_instruction(Op::Proc(None));
        let block = ctx.open_block(BlockKind::Proc);
        let id = ctx
            .define_procedure(&tok("main", 2), Vec::new(), Vec::new(), block)
            .unwrap();
        ctx.enter_procedure(id);

        let local = ctx.allocate_memory(&tok("scratch", 3), 5).unwrap();
        assert_eq!(global.offset, 0);
        assert_eq!(local.offset, 0);
        assert_eq!(local.owner, crate::MemoryOwner::Procedure(id));
        assert!(ctx.allocate_memory(&tok("scratch", 4), 5).is_err());
        assert!(ctx.allocate_memory(&tok("heap", 4), 5).is_err());
        assert_eq!(ctx.lookup_memory("scratch").map(|m| m.offset), Some(0));
        assert!(ctx.lookup_memory("heap").is_some());

        ctx.leave_procedure();
        assert!(ctx.lookup_memory("scratch").is_none());
        let next = ctx.allocate_memory(&tok("scratch", 5), 1).unwrap();
        assert_eq!(next.offset, 16);
    }

    #[test]
    fn variables_follow_current_procedure() {
        let mut ctx = context();
        ctx.bind_variable(Binding::new("g", DataType::Int));

        ctx.new_instruction(Op::Proc(None));
        let block = ctx.open_block(BlockKind::Proc);
        let id = ctx
            .define_procedure(&tok("f", 1), Vec::new(), Vec::new(), block)
            .unwrap();
        ctx.enter_procedure(id);
        ctx.bind_variable(Binding::new("x", DataType::Ptr));

        assert_eq!(ctx.lookup_variable("x").map(|b| b.ty), Some(DataType::Ptr));
        assert_eq!(ctx.lookup_variable("g").map(|b| b.ty), Some(DataType::Int));
        ctx.leave_procedure();
        assert!(ctx.lookup_variable("x").is_none());
    }

    #[test]
    fn methods_use_owner_and_flags() {
        let mut ctx = context();
        ctx.flags |= DefinitionFlags::UNPACK;
        let shape = ctx
            .define_struct(
                &tok("Shape", 1),
                vec![Field::new("w", DataType::Int)],
                None,
                HashMap::new(),
            )
            .unwrap();
        ctx.flags = DefinitionFlags::NAMED;
        let circle = ctx
            .define_struct(&tok("Circle", 2), Vec::new(), Some(shape), HashMap::new())
            .unwrap();
        assert!(ctx.types.get(shape).is_unpackable);
        assert!(!ctx.types.get(circle).is_unpackable);

        ctx.owner = Some(shape);
        let block = ctx.open_block(BlockKind::Proc);
        let area = ctx
            .define_procedure(&tok("area", 3), Vec::new(), vec![DataType::Int], block)
            .unwrap();
        ctx.close_block().unwrap();

        ctx.flags |= DefinitionFlags::STATIC;
        let block = ctx.open_block(BlockKind::Proc);
        let unit = ctx
            .define_procedure(&tok("unit", 4), Vec::new(), Vec::new(), block)
            .unwrap();
        ctx.close_block().unwrap();
        ctx.owner = None;
        ctx.flags = DefinitionFlags::empty();

        assert!(ctx.procs.get(area).is_named);
        assert_eq!(ctx.types.get(circle).method("area"), Some(area));
        assert_eq!(ctx.types.get(shape).static_method("unit"), Some(unit));
        assert_eq!(ctx.procs.get(unit).receiver(), None);
        assert_eq!(ctx.namespace.procedure("area"), None);

        // method names live in the struct, so a global may reuse them
        let body = Block::new(BlockKind::Proc, 0);
        assert!(
            ctx.define_procedure(&tok("area", 5), Vec::new(), Vec::new(), body)
                .is_ok()
        );

        ctx.owner = Some(shape);
        let err = ctx
            .define_procedure(&tok("dup", 6), Vec::new(), Vec::new(), body)
            .unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::ReservedName {
                kind: EntityKind::Method,
                name: "dup".into()
            }
        );
    }

    #[test]
    fn procedure_by_block_reads_defining_op() {
        let mut ctx = context();
        ctx.new_instruction(Op::Push(1));
        let ip = ctx.new_instruction(Op::Proc(None));
        let block = ctx.open_block(BlockKind::Proc);
        assert_eq!(block.start, ip);

        let id = ctx
            .define_procedure(&tok("p", 1), Vec::new(), Vec::new(), block)
            .unwrap();
        *ctx.instruction_mut(ip).unwrap() = Op::Proc(Some(id));
        ctx.new_instruction(Op::Return);
        let closed = ctx.close_block().unwrap();

        assert_eq!(closed.end, Some(2));
        assert_eq!(ctx.get_procedure_by_block(&closed), Ok(id));

        let not_proc = Block::new(BlockKind::If, 0);
        assert_eq!(
            ctx.get_procedure_by_block(&not_proc).unwrap_err().kind,
            ErrorKind::NotAProcedureBlock { ip: 0 }
        );
    }

    #[test]
    fn block_opened_before_any_instruction_starts_at_zero() {
        let mut ctx = context();
        let block = ctx.open_block(BlockKind::Proc);
        assert_eq!(block.start, 0);
        assert_eq!(
            ctx.get_procedure_by_block(&block).unwrap_err().kind,
            ErrorKind::NotAProcedureBlock { ip: 0 }
        );

        let ip = ctx.new_instruction(Op::Proc(None));
        assert_eq!(ip, block.start);
        let id = ctx
            .define_procedure(&tok("early", 1), Vec::new(), Vec::new(), block)
            .unwrap();
        *ctx.instruction_mut(ip).unwrap() = Op::Proc(Some(id));

        let closed = ctx.close_block().unwrap();
        assert_eq!(closed.end, Some(0));
        assert_eq!(ctx.get_procedure_by_block(&closed), Ok(id));
    }

    #[test]
    fn unbalanced_blocks_fail() {
        let mut ctx = context();
        let err = ctx.close_block().unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnexpectedClose { .. }));

        ctx.new_instruction(Op::Push(0));
        ctx.open_block(BlockKind::While);
        let err = ctx.finish().unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::UnclosedBlock {
                kind: BlockKind::While,
                start: 0
            }
        );

        let err = ctx.close_block_with("else").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::BlockMismatch { .. }));
        ctx.close_block().unwrap();
        assert!(ctx.finish().is_ok());
    }

    #[test]
    fn compile_if_regions_nest() {
        let mut ctx = context();
        assert!(!ctx.is_skipping());

        ctx.enter_compile_if(true);
        assert!(!ctx.is_skipping());
        ctx.enter_compile_if(false);
        assert!(ctx.is_skipping());
        ctx.enter_compile_if(true);
        assert!(ctx.is_skipping());
        assert!(ctx.finish().is_err());

        ctx.leave_compile_if().unwrap();
        assert!(ctx.is_skipping());
        ctx.leave_compile_if().unwrap();
        assert!(!ctx.is_skipping());
        ctx.leave_compile_if().unwrap();
        assert_eq!(ctx.compile_if_depth(), 0);

        assert_eq!(
            ctx.leave_compile_if().unwrap_err().kind,
            ErrorKind::UnbalancedCompileIf
        );
    }

    #[test]
    fn used_procs_from_top_level_and_bodies() {
        let mut ctx = context();
        let define = |ctx: &mut CompilationContext<Op>, name: &str| {
            ctx.new_instruction(Op::Proc(None));
            let block = ctx.open_block(BlockKind::Proc);
            let id = ctx
                .define_procedure(&tok(name, 1), Vec::new(), Vec::new(), block)
                .unwrap();
            ctx.close_block().unwrap();
            id
        };
        let p1 = define(&mut ctx, "p1");
        let p2 = define(&mut ctx, "p2");
        let p3 = define(&mut ctx, "p3");
        let p4 = define(&mut ctx, "p4");

        ctx.enter_procedure(p1);
        ctx.add_proc_use(p2);
        ctx.leave_procedure();
        ctx.enter_procedure(p2);
        ctx.add_proc_use(p3);
        ctx.leave_procedure();
        ctx.new_instruction(Op::Call(p1));
        ctx.add_proc_use(p1);

        assert!(ctx.used_procs().is_none());
        let used = ctx.compute_used_procs().clone();
        assert_eq!(used, HashSet::from([p1, p2, p3]));
        assert!(!used.contains(&p4));

        let program = ctx.into_program().unwrap();
        assert_eq!(program.used_procs, used);
        assert_eq!(program.procs.len(), 4);
    }

    #[test]
    fn string_data_indices_are_dense() {
        let mut ctx = context();
        assert_eq!(ctx.add_string_data("hello"), 0);
        assert_eq!(ctx.add_string_data(vec![0u8, 1]), 1);
        assert_eq!(ctx.string_data()[0], b"hello");
    }

    #[test]
    fn check_collects_in_collect_mode() {
        let mut ctx = context();
        let result = ctx.close_block();
        assert_eq!(ctx.check(result), None);
        assert_eq!(ctx.reporter().error_count(), 1);
    }
}
