//! AST → operand/condition lowering (spec §4.D steps 1-3).

use catrule_core::{make_operand, Builtin, CompareOp, ConditionKind, Operand, OperandKind};
use catrule_lang::{BinOp, CmpOp, Expr as LExpr, Literal, Path, PathSegment};

use crate::error::CompileError;
use crate::scope::ScopeStack;
use crate::RuleCompiler;

/// The result of lowering one AST subtree that sits in "boolean position"
/// (the top-level expression, or either side of `&&`/`||`/`!`). Matches
/// the shapes enumerated in spec §4.D step 3.
pub(crate) enum Bool {
    And(Vec<Bool>),
    Or(Vec<Bool>),
    /// A leaf: a comparison or builtin call, not yet assigned a category id.
    /// `negated` folds an enclosing `!` that couldn't be pushed any further
    /// (everything except `Compare`, which absorbs it via `negate_cmp`
    /// instead) — applied only after `lib.rs` assigns the category id, so
    /// CSE and fast-path folding still see the un-negated leaf shape.
    Leaf { negated: bool, kind: ConditionKind },
}

impl RuleCompiler {
    pub(crate) fn lower_bool(&mut self, scopes: &mut ScopeStack, expr: &LExpr) -> Result<Bool, CompileError> {
        match expr {
            LExpr::BinOp { op: BinOp::And, left, right } => Ok(Bool::And(vec![
                self.lower_bool(scopes, left)?,
                self.lower_bool(scopes, right)?,
            ])),
            LExpr::BinOp { op: BinOp::Or, left, right } => Ok(Bool::Or(vec![
                self.lower_bool(scopes, left)?,
                self.lower_bool(scopes, right)?,
            ])),
            LExpr::BinOp { op: BinOp::Cmp(cmp), left, right } => {
                let l = self.lower_operand(scopes, left)?;
                let r = self.lower_operand(scopes, right)?;
                Ok(Bool::Leaf { negated: false, kind: ConditionKind::Compare(cmp_op(*cmp), l, r) })
            }
            LExpr::Not(inner) => {
                let lowered = self.lower_bool(scopes, inner)?;
                Ok(negate(lowered))
            }
            LExpr::Quantifier { .. } | LExpr::Call { .. } => {
                let op = self.lower_operand(scopes, expr)?;
                Ok(Bool::Leaf { negated: false, kind: ConditionKind::Truthy(op) })
            }
            // A bare path or literal used directly in boolean position
            // (e.g. `hasValue(x)` already handled above; `x` alone means
            // "x is truthy" per the same result-kind dispatch).
            LExpr::Path(_) | LExpr::Literal(_) => {
                let op = self.lower_operand(scopes, expr)?;
                Ok(Bool::Leaf { negated: false, kind: ConditionKind::Truthy(op) })
            }
            LExpr::BinOp { op: BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div, .. } => {
                let op = self.lower_operand(scopes, expr)?;
                Ok(Bool::Leaf { negated: false, kind: ConditionKind::Truthy(op) })
            }
        }
    }

    pub(crate) fn lower_operand(&mut self, scopes: &mut ScopeStack, expr: &LExpr) -> Result<Operand, CompileError> {
        let kind = match expr {
            LExpr::Literal(Literal::Int(n)) => OperandKind::Int(*n),
            LExpr::Literal(Literal::Float(f)) => OperandKind::Float(*f),
            LExpr::Literal(Literal::Str(s)) => OperandKind::String(s.as_str().into()),
            LExpr::Literal(Literal::Bool(b)) => OperandKind::Bool(*b),
            LExpr::Literal(Literal::Null) => OperandKind::Null,
            LExpr::Path(path) => {
                let addr = self.resolve_path(scopes, path)?;
                OperandKind::Address(addr, None)
            }
            LExpr::Not(inner) => {
                // Arithmetic/value position negation of a boolean sub-expr:
                // lower it as a condition and read its truth value back out
                // via a synthetic Expr — rare (the grammar mainly uses `!`
                // in boolean position) but representable.
                let lowered = self.lower_operand(scopes, inner)?;
                OperandKind::Expr(Builtin::IntFn, vec![lowered])
            }
            LExpr::BinOp { op, left, right } => {
                let l = self.lower_operand(scopes, left)?;
                let r = self.lower_operand(scopes, right)?;
                match op {
                    BinOp::Add => OperandKind::Expr(Builtin::Add, vec![l, r]),
                    BinOp::Sub => OperandKind::Expr(Builtin::Sub, vec![l, r]),
                    BinOp::Mul => OperandKind::Expr(Builtin::Mul, vec![l, r]),
                    BinOp::Div => OperandKind::Expr(Builtin::Div, vec![l, r]),
                    BinOp::Cmp(CmpOp::Eq) => OperandKind::Expr(Builtin::IsEqualToAny, vec![l, r]),
                    BinOp::Cmp(_) => {
                        return Err(CompileError::UnknownBuiltin(
                            "ordering comparison used in value position".to_string(),
                        ));
                    }
                    BinOp::And | BinOp::Or => unreachable!("handled by lower_bool"),
                }
            }
            LExpr::Call { name, args } => return self.lower_call(scopes, name, args),
            LExpr::Quantifier { is_for_all, path, element, predicate } => {
                return self.lower_quantifier(scopes, *is_for_all, path, element, predicate);
            }
        };
        Ok(self.intern_operand(kind))
    }

    fn lower_call(&mut self, scopes: &mut ScopeStack, name: &str, args: &[LExpr]) -> Result<Operand, CompileError> {
        let builtin = builtin_for_name(name).ok_or_else(|| CompileError::UnknownBuiltin(name.to_string()))?;
        check_arity(name, builtin, args.len())?;
        let lowered: Vec<Operand> = args
            .iter()
            .map(|a| self.lower_operand(scopes, a))
            .collect::<Result<_, _>>()?;
        Ok(self.intern_operand(OperandKind::Expr(builtin, lowered)))
    }

    fn lower_quantifier(
        &mut self,
        scopes: &mut ScopeStack,
        is_for_all: bool,
        path: &str,
        element: &str,
        predicate: &LExpr,
    ) -> Result<Operand, CompileError> {
        let array_addr = self.resolve_path(scopes, &parse_simple_path(path))?;
        let base_address = array_addr.full_address.clone();
        let nesting_level = scopes.push(element.to_string(), base_address);
        // Reserve the element's own scalar slot ($self) unconditionally —
        // cheap, and lets bare `element == x`-shaped predicates over scalar
        // arrays resolve without a second compiler pass.
        let self_addr = self.resolve_path(scopes, &Path::simple(element))?;
        let _ = self_addr;
        let predicate_op = self.lower_operand(scopes, predicate)?;
        scopes.pop();

        let array_op = self.intern_operand(OperandKind::Address(array_addr, None));
        let builtin = if is_for_all { Builtin::ForAll } else { Builtin::ForSome };
        let level_op = self.intern_operand(OperandKind::Int(nesting_level as i64));
        Ok(self.intern_operand(OperandKind::Expr(builtin, vec![array_op, predicate_op, level_op])))
    }

    /// Resolves a `catrule_lang::Path` to a dictionary address, honoring the
    /// active `forAll`/`forSome` element bindings (spec §4.D "scope stack").
    fn resolve_path(&self, scopes: &ScopeStack, path: &Path) -> Result<catrule_core::AttributeAddress, CompileError> {
        if let Some(scope) = scopes.find_binding(&path.root) {
            let rest = path_text(&path.segments)?;
            let text = if rest.is_empty() {
                "$self".to_string()
            } else {
                rest
            };
            let address = self.dict.path_to_address_in_scope(&scope.base_address, &text);
            let mut full_address = scope.base_address.clone();
            full_address.extend(address.iter().copied());
            return Ok(catrule_core::AttributeAddress {
                address,
                path: format!("{}.{}", path.root, text),
                parent_param_idx: Some(scope.nesting_level),
                full_address,
            });
        }
        let full = path_text_full(path)?;
        Ok(self.dict.path_to_address(&full))
    }

    fn intern_operand(&mut self, kind: OperandKind) -> Operand {
        let node = make_operand(kind);
        let hash = node.hash();
        self.operands.intern_with(hash, || node)
    }
}

fn negate(b: Bool) -> Bool {
    match b {
        Bool::And(items) => Bool::Or(items.into_iter().map(negate).collect()),
        Bool::Or(items) => Bool::And(items.into_iter().map(negate).collect()),
        // Only `==`/`!=` fold straight into the opposite operator — `Ne` is
        // defined as the literal negation of `Eq` (including how each
        // treats `null`), so the fold is exact. Ordering operators are
        // *not* folded: `<=`/`>=` short-circuit to `false` on a null
        // operand (spec §4.A) rather than being `!(>)`/`!(<)`, so `!(a>b)`
        // and `a<=b` disagree whenever `a`/`b` can be missing. Those (and
        // `contains`) keep their `negated` flag and get wrapped in
        // `ConditionKind::Not` once a category id is assigned, routing
        // through the negated-category/default-list mechanism instead.
        Bool::Leaf { kind: ConditionKind::Compare(op @ (CompareOp::Eq | CompareOp::Ne), l, r), .. } => {
            Bool::Leaf { negated: false, kind: ConditionKind::Compare(negate_cmp(op), l, r) }
        }
        Bool::Leaf { negated, kind } => Bool::Leaf { negated: !negated, kind },
    }
}

fn negate_cmp(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Eq => CompareOp::Ne,
        CompareOp::Ne => CompareOp::Eq,
        _ => unreachable!("negate_cmp only folds equality comparisons"),
    }
}

fn cmp_op(op: CmpOp) -> CompareOp {
    match op {
        CmpOp::Eq => CompareOp::Eq,
        CmpOp::Ne => CompareOp::Ne,
        CmpOp::Lt => CompareOp::Lt,
        CmpOp::Le => CompareOp::Le,
        CmpOp::Gt => CompareOp::Gt,
        CmpOp::Ge => CompareOp::Ge,
    }
}

fn builtin_for_name(name: &str) -> Option<Builtin> {
    Some(match name {
        "regexpMatch" => Builtin::RegexpMatch,
        "hasValue" => Builtin::HasValue,
        "isEqualToAny" => Builtin::IsEqualToAny,
        "isEqualToAnyWithDate" => Builtin::IsEqualToAnyWithDate,
        "containsAny" => Builtin::ContainsAny,
        "date" => Builtin::DateFn,
        "string" => Builtin::StringFn,
        "int" => Builtin::IntFn,
        "float" => Builtin::FloatFn,
        "sqrt" => Builtin::Sqrt,
        _ => return None,
    })
}

fn check_arity(name: &str, builtin: Builtin, got: usize) -> Result<(), CompileError> {
    let ok = match builtin {
        Builtin::RegexpMatch => got == 2,
        Builtin::HasValue | Builtin::DateFn | Builtin::StringFn | Builtin::IntFn | Builtin::FloatFn | Builtin::Sqrt => got == 1,
        Builtin::IsEqualToAny => got >= 2,
        Builtin::ContainsAny => got >= 2,
        Builtin::IsEqualToAnyWithDate => got >= 2 && (got - 2) % 3 == 0,
        Builtin::ForAll | Builtin::ForSome => got == 3,
        Builtin::Add | Builtin::Sub | Builtin::Mul | Builtin::Div => got == 2,
    };
    if ok {
        Ok(())
    } else {
        Err(CompileError::ArityMismatch(name_static(name), expected_desc(builtin), got))
    }
}

fn name_static(name: &str) -> &'static str {
    match name {
        "regexpMatch" => "regexpMatch",
        "hasValue" => "hasValue",
        "isEqualToAny" => "isEqualToAny",
        "isEqualToAnyWithDate" => "isEqualToAnyWithDate",
        "containsAny" => "containsAny",
        "date" => "date",
        "string" => "string",
        "int" => "int",
        "float" => "float",
        "sqrt" => "sqrt",
        _ => "<builtin>",
    }
}

fn expected_desc(builtin: Builtin) -> usize {
    match builtin {
        Builtin::RegexpMatch | Builtin::Add | Builtin::Sub | Builtin::Mul | Builtin::Div => 2,
        Builtin::HasValue | Builtin::DateFn | Builtin::StringFn | Builtin::IntFn | Builtin::FloatFn | Builtin::Sqrt => 1,
        Builtin::ForAll | Builtin::ForSome => 3,
        _ => 2,
    }
}

fn path_text_full(path: &Path) -> Result<String, CompileError> {
    let mut out = path.root.clone();
    for seg in &path.segments {
        append_segment(&mut out, seg)?;
    }
    Ok(out)
}

fn path_text(segments: &[PathSegment]) -> Result<String, CompileError> {
    let mut out = String::new();
    let mut first = true;
    for seg in segments {
        match seg {
            PathSegment::Field(name) => {
                if !first {
                    out.push('.');
                }
                out.push_str(name);
            }
            PathSegment::Index(_) => append_segment(&mut out, seg)?,
        }
        first = false;
    }
    Ok(out)
}

fn append_segment(out: &mut String, seg: &PathSegment) -> Result<(), CompileError> {
    match seg {
        PathSegment::Field(name) => {
            out.push('.');
            out.push_str(name);
        }
        PathSegment::Index(expr) => {
            let n = literal_index(expr)?;
            out.push('[');
            out.push_str(&n.to_string());
            out.push(']');
        }
    }
    Ok(())
}

/// Splits a dotted path given as a quantifier's first/second string-literal
/// argument (e.g. `"user.tags"`) into a [`Path`] without re-running the full
/// expression parser.
fn parse_simple_path(text: &str) -> Path {
    let mut parts = text.split('.');
    let root = parts.next().unwrap_or("").to_string();
    let segments = parts.map(|p| PathSegment::Field(p.to_string())).collect();
    Path { root, segments }
}

fn literal_index(expr: &LExpr) -> Result<u32, CompileError> {
    match expr {
        LExpr::Literal(Literal::Int(n)) if *n >= 0 => Ok(*n as u32),
        _ => Err(CompileError::DynamicIndex),
    }
}
