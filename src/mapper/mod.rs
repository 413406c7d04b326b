//! # Physical Plan Mapper
//!
//! One-pass rewrite of the logical tree into physical operators. The
//! factorized schema is the bridge: group *g*, expression *v* becomes
//! vector position `(g, v)` in the pipeline's result set, so the layout
//! of a pipeline is read straight off the schema of its topmost logical
//! operator (schemas only ever extend their child's, so positions are
//! stable all the way down).
//!
//! Pipeline breakers (accumulate, order-by, aggregate, hash-join build,
//! copy) map to sinks paired with a downstream factorized-table scan.
//! SIP joins insert a semi-masker over the build chain and hand its mask
//! to the probe side's leaf node scan.

use crate::binder::{BoundStatement, BoundStatementKind};
use crate::error::{QuiverError, QuiverResult};
use crate::evaluator::{ExpressionEvaluator, ExpressionLayout};
use crate::execution::ddl::SessionState;
use crate::execution::{
    aggregate, collector, copy, ddl, extend, filter, hash_join, scan, FactorizedTable,
    PhysicalOperator, PhysicalPlan,
};
use crate::expression::{Expression, ExpressionKind};
use crate::function::FunctionRegistry;
use crate::planner::operator::{LogicalOperator, LogicalOperatorKind};
use crate::planner::{JoinType, LogicalPlan, Schema, SidewaysInfoPassing};
use crate::types::LogicalType;
use crate::vector::{DataPos, ResultSetDescriptor};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Vector layout recovered from a factorized schema
struct Layout {
    descriptor: ResultSetDescriptor,
    positions: ExpressionLayout,
}

fn layout_of(schema: &Schema) -> Layout {
    let mut chunk_types = Vec::with_capacity(schema.groups.len());
    let mut positions = ExpressionLayout::new();
    for (g, group) in schema.groups.iter().enumerate() {
        let mut types = Vec::with_capacity(group.expressions.len());
        for (v, expr) in group.expressions.iter().enumerate() {
            positions.insert(expr.name.clone(), DataPos::new(g, v));
            types.push(expr.ty.clone());
        }
        chunk_types.push(types);
    }
    Layout {
        descriptor: ResultSetDescriptor { chunk_types },
        positions,
    }
}

fn pos_of(layout: &Layout, name: &str) -> QuiverResult<DataPos> {
    layout.positions.get(name).copied().ok_or_else(|| {
        QuiverError::internal(format!("expression {name} is missing from the layout"))
    })
}

/// (storage column, output slot) pairs for a list of property expressions
fn property_slots(
    properties: &[Expression],
    layout: &Layout,
) -> QuiverResult<Vec<(usize, DataPos)>> {
    let mut slots = Vec::with_capacity(properties.len());
    for prop in properties {
        let ExpressionKind::Property { property_idx, .. } = &prop.kind else {
            return Err(QuiverError::internal(
                "property list holds a non-property expression",
            ));
        };
        slots.push((*property_idx, pos_of(layout, &prop.name)?));
    }
    Ok(slots)
}

/// The mapper
pub struct PlanMapper {
    catalog: Arc<RwLock<crate::catalog::Catalog>>,
    functions: Arc<FunctionRegistry>,
    session: Arc<SessionState>,
    morsel_size: u64,
    /// SIP masks waiting for the probe side's leaf scan, by variable
    pending_masks: Mutex<HashMap<String, Arc<scan::SemiMask>>>,
}

impl PlanMapper {
    pub fn new(
        catalog: Arc<RwLock<crate::catalog::Catalog>>,
        functions: Arc<FunctionRegistry>,
        session: Arc<SessionState>,
        morsel_size: u64,
    ) -> Self {
        PlanMapper {
            catalog,
            functions,
            session,
            morsel_size,
            pending_masks: Mutex::new(HashMap::new()),
        }
    }

    pub fn map_plan(
        &self,
        plan: &LogicalPlan,
        bound: &BoundStatement,
    ) -> QuiverResult<PhysicalPlan> {
        // An unresolved ANY that escaped the default solver is a binder
        // bug surfaced before execution, not at runtime.
        for expr in plan.root.schema.expressions_in_scope() {
            if expr.ty == LogicalType::Any {
                return Err(QuiverError::binder(format!(
                    "Type of expression {} could not be resolved.",
                    expr.name
                )));
            }
        }

        let mut mapped = self.map_operator(&plan.root)?;
        debug!(root = mapped.name(), "mapped physical plan");
        if mapped.is_sink() {
            let result_table = mapped
                .result_table()
                .unwrap_or_else(|| FactorizedTable::new(vec![]));
            return Ok(PhysicalPlan {
                root: mapped,
                result_table,
                result_columns: bound.columns.clone(),
            });
        }

        // The collector reads logical rows, which tolerates one unflat
        // axis; any further unflat groups flatten here.
        let scope_groups = plan.root.schema.groups_in_scope();
        for group in plan
            .root
            .schema
            .unflat_among(&scope_groups)
            .into_iter()
            .skip(1)
        {
            mapped = PhysicalOperator::Flatten(filter::Flatten::new(group, Box::new(mapped)));
        }

        // Queries end in a result collector over the statement's columns.
        let layout = layout_of(&plan.root.schema);
        let mut payloads = Vec::with_capacity(bound.columns.len());
        for (name, _) in &bound.columns {
            payloads.push(pos_of(&layout, name)?);
        }
        let types: Vec<LogicalType> = bound.columns.iter().map(|(_, t)| t.clone()).collect();
        let table = FactorizedTable::new(types);
        let root = PhysicalOperator::ResultCollector(collector::ResultCollector::new(
            payloads,
            layout.descriptor,
            Arc::clone(&table),
            false,
            Box::new(mapped),
        ));
        Ok(PhysicalPlan {
            root,
            result_table: table,
            result_columns: bound.columns.clone(),
        })
    }

    fn compile(
        &self,
        expr: &Expression,
        layout: &Layout,
    ) -> QuiverResult<ExpressionEvaluator> {
        ExpressionEvaluator::compile(expr, &layout.positions, &self.functions)
    }

    fn map_operator(&self, op: &LogicalOperator) -> QuiverResult<PhysicalOperator> {
        let own_layout = layout_of(&op.schema);
        match &op.kind {
            LogicalOperatorKind::DummyScan => {
                Ok(PhysicalOperator::DummyScan(scan::DummyScan::new(0)))
            }
            LogicalOperatorKind::EmptyResult { .. } => {
                Ok(PhysicalOperator::EmptyResult(scan::EmptyResult))
            }
            LogicalOperatorKind::ScanNode {
                table,
                variable,
                properties,
            } => {
                let out_id = pos_of(&own_layout, &variable.name)?;
                let mut prop_slots = Vec::with_capacity(properties.len());
                for prop in properties {
                    let ExpressionKind::Property { property_idx, .. } = &prop.kind else {
                        return Err(QuiverError::internal(
                            "scan property list holds a non-property expression",
                        ));
                    };
                    prop_slots.push((*property_idx, pos_of(&own_layout, &prop.name)?));
                }
                let mask = self.pending_masks.lock().remove(&variable.name);
                Ok(PhysicalOperator::ScanNodeTable(scan::ScanNodeTable {
                    table: *table,
                    out_chunk: out_id.chunk,
                    out_id,
                    properties: prop_slots,
                    shared: scan::ScanSharedState::new(self.morsel_size),
                    mask,
                }))
            }
            LogicalOperatorKind::Extend {
                rel_table,
                direction,
                bound,
                nbr,
                rel_variable,
                properties,
                nbr_properties,
            } => {
                let child = self.map_operator(op.child(0))?;
                let child_layout = layout_of(&op.child(0).schema);
                let bound_pos = pos_of(&child_layout, &bound.name)?;
                let out_nbr = pos_of(&own_layout, &nbr.name)?;
                let rel_out = rel_variable
                    .as_ref()
                    .map(|rv| pos_of(&own_layout, &rv.name))
                    .transpose()?;
                let prop_slots = property_slots(properties, &own_layout)?;
                let node_prop_slots = property_slots(nbr_properties, &own_layout)?;
                Ok(PhysicalOperator::Extend(extend::Extend::new(
                    *rel_table,
                    *direction,
                    bound_pos,
                    out_nbr,
                    out_nbr.chunk,
                    rel_out,
                    prop_slots,
                    node_prop_slots,
                    Box::new(child),
                )))
            }
            LogicalOperatorKind::RecursiveExtend {
                rel_table,
                direction,
                bound,
                nbr,
                kind,
                lower,
                upper,
                nbr_properties,
            } => {
                let child = self.map_operator(op.child(0))?;
                let child_layout = layout_of(&op.child(0).schema);
                let bound_pos = pos_of(&child_layout, &bound.name)?;
                let out_nbr = pos_of(&own_layout, &nbr.name)?;
                let node_prop_slots = property_slots(nbr_properties, &own_layout)?;
                Ok(PhysicalOperator::RecursiveExtend(
                    extend::RecursiveExtend::new(
                        *rel_table,
                        *direction,
                        bound_pos,
                        out_nbr,
                        out_nbr.chunk,
                        *kind,
                        *lower,
                        *upper,
                        node_prop_slots,
                        Box::new(child),
                    ),
                ))
            }
            LogicalOperatorKind::Filter { predicate } => {
                let child = self.map_operator(op.child(0))?;
                let child_layout = layout_of(&op.child(0).schema);
                let predicate = self.compile(predicate, &child_layout)?;
                Ok(PhysicalOperator::Filter(filter::Filter {
                    predicate,
                    child: Box::new(child),
                }))
            }
            LogicalOperatorKind::Flatten { group } => {
                let child = self.map_operator(op.child(0))?;
                Ok(PhysicalOperator::Flatten(filter::Flatten::new(
                    *group,
                    Box::new(child),
                )))
            }
            LogicalOperatorKind::Projection { expressions } => {
                let child = self.map_operator(op.child(0))?;
                let child_layout = layout_of(&op.child(0).schema);
                let mut items = Vec::new();
                for expr in expressions {
                    if child_layout.positions.contains_key(&expr.name) {
                        continue;
                    }
                    let evaluator = self.compile(expr, &child_layout)?;
                    items.push((evaluator, pos_of(&own_layout, &expr.name)?));
                }
                Ok(PhysicalOperator::Projection(filter::Projection {
                    items,
                    child: Box::new(child),
                }))
            }
            LogicalOperatorKind::Limit { skip, limit } => {
                let child = self.map_operator(op.child(0))?;
                let child_schema = &op.child(0).schema;
                let target_chunk = child_schema
                    .unflat_among(&child_schema.groups_in_scope())
                    .first()
                    .copied();
                Ok(PhysicalOperator::Limit(filter::Limit {
                    skip: *skip,
                    limit: *limit,
                    target_chunk,
                    shared: Arc::new(Mutex::new(filter::LimitCounters::default())),
                    child: Box::new(child),
                }))
            }
            LogicalOperatorKind::MultiplicityReducer => {
                let child = self.map_operator(op.child(0))?;
                Ok(PhysicalOperator::MultiplicityReducer(
                    filter::MultiplicityReducer::new(Box::new(child)),
                ))
            }
            LogicalOperatorKind::Unwind { list, alias } => {
                let child = self.map_operator(op.child(0))?;
                let child_layout = layout_of(&op.child(0).schema);
                let list = self.compile(list, &child_layout)?;
                let out = pos_of(&own_layout, &alias.name)?;
                Ok(PhysicalOperator::Unwind(filter::Unwind::new(
                    list,
                    out,
                    out.chunk,
                    Box::new(child),
                )))
            }
            LogicalOperatorKind::HashJoin {
                join_keys,
                join_type,
                mark,
                sip,
            } => self.map_hash_join(op, join_keys, *join_type, mark.as_ref(), *sip, &own_layout),
            LogicalOperatorKind::CrossProduct => {
                let build_logical = op.child(1);
                let build_phys = self.map_operator(build_logical)?;
                let build_layout = layout_of(&build_logical.schema);
                let build_scope: Vec<&Expression> =
                    build_logical.schema.expressions_in_scope();
                let mut build_positions = Vec::with_capacity(build_scope.len());
                let mut types = Vec::with_capacity(build_scope.len());
                for expr in &build_scope {
                    build_positions.push(pos_of(&build_layout, &expr.name)?);
                    types.push(expr.ty.clone());
                }
                let table = FactorizedTable::new(types);
                let build_sink =
                    PhysicalOperator::ResultCollector(collector::ResultCollector::new(
                        build_positions,
                        build_layout.descriptor,
                        Arc::clone(&table),
                        false,
                        Box::new(build_phys),
                    ));

                let child = self.map_operator(op.child(0))?;
                let out_chunk = op.schema.groups.len() - 1;
                let mut outputs = Vec::with_capacity(build_scope.len());
                for expr in &build_scope {
                    outputs.push(pos_of(&own_layout, &expr.name)?);
                }
                Ok(PhysicalOperator::CrossProduct(hash_join::CrossProduct::new(
                    table,
                    outputs,
                    out_chunk,
                    Box::new(child),
                    Box::new(build_sink),
                )))
            }
            LogicalOperatorKind::Aggregate { keys, aggregates } => {
                self.map_aggregate(op, keys, aggregates, &own_layout)
            }
            LogicalOperatorKind::Distinct { keys } => {
                self.map_aggregate(op, keys, &[], &own_layout)
            }
            LogicalOperatorKind::OrderBy { keys, payloads } => {
                let child = self.map_operator(op.child(0))?;
                let child_layout = layout_of(&op.child(0).schema);
                let mut key_slots = Vec::with_capacity(keys.len());
                for (key, ascending) in keys {
                    key_slots.push((pos_of(&child_layout, &key.name)?, *ascending));
                }
                let mut payload_slots = Vec::with_capacity(payloads.len());
                let mut types = Vec::with_capacity(payloads.len());
                for payload in payloads {
                    payload_slots.push(pos_of(&child_layout, &payload.name)?);
                    types.push(payload.ty.clone());
                }
                let output = FactorizedTable::new(types);
                let shared = crate::execution::order_by::OrderByShared::new(Arc::clone(&output));
                let sink = PhysicalOperator::OrderBySink(
                    crate::execution::order_by::OrderBySink::new(
                        key_slots,
                        payload_slots,
                        child_layout.descriptor,
                        shared,
                        Box::new(child),
                    ),
                );
                self.ftable_scan(op, output, true, vec![sink])
            }
            LogicalOperatorKind::Accumulate {
                accumulate_type,
                mark: _,
            } => {
                let child = self.map_operator(op.child(0))?;
                let child_layout = layout_of(&op.child(0).schema);
                let scope: Vec<&Expression> = op.child(0).schema.expressions_in_scope();
                let mut payloads = Vec::with_capacity(scope.len());
                let mut types = Vec::with_capacity(scope.len());
                for expr in &scope {
                    payloads.push(pos_of(&child_layout, &expr.name)?);
                    types.push(expr.ty.clone());
                }
                let table = FactorizedTable::new(types);
                let optional = matches!(
                    accumulate_type,
                    crate::planner::AccumulateType::Optional
                );
                let sink = PhysicalOperator::ResultCollector(collector::ResultCollector::new(
                    payloads,
                    child_layout.descriptor,
                    Arc::clone(&table),
                    optional,
                    Box::new(child),
                ));
                self.ftable_scan(op, table, false, vec![sink])
            }
            LogicalOperatorKind::Union => {
                let scope: Vec<Expression> = op
                    .schema
                    .expressions_in_scope()
                    .into_iter()
                    .cloned()
                    .collect();
                let types: Vec<LogicalType> = scope.iter().map(|e| e.ty.clone()).collect();
                let table = FactorizedTable::new(types);
                let mut dependencies = Vec::with_capacity(op.children.len());
                for child in &op.children {
                    let child_phys = self.map_operator(child)?;
                    let child_layout = layout_of(&child.schema);
                    let mut payloads = Vec::with_capacity(scope.len());
                    for expr in child.schema.expressions_in_scope() {
                        payloads.push(pos_of(&child_layout, &expr.name)?);
                    }
                    dependencies.push(PhysicalOperator::ResultCollector(
                        collector::ResultCollector::new(
                            payloads,
                            child_layout.descriptor,
                            Arc::clone(&table),
                            false,
                            Box::new(child_phys),
                        ),
                    ));
                }
                self.ftable_scan(op, table, false, dependencies)
            }
            LogicalOperatorKind::TableCall {
                function,
                args,
                columns,
            } => {
                let mut outputs = Vec::with_capacity(columns.len());
                for column in columns {
                    outputs.push(pos_of(&own_layout, &column.name)?);
                }
                Ok(PhysicalOperator::TableFunctionCall(scan::TableFunctionCall {
                    function: function.clone(),
                    args: args.clone(),
                    out_chunk: 0,
                    outputs,
                    shared: Arc::new(scan::TableFnShared::default()),
                }))
            }
            LogicalOperatorKind::CreateNode { table, values } => {
                let child = self.map_operator(op.child(0))?;
                let child_layout = layout_of(&op.child(0).schema);
                let mut evaluators = Vec::with_capacity(values.len());
                for value in values {
                    evaluators.push(self.compile(value, &child_layout)?);
                }
                Ok(PhysicalOperator::CreateNode(ddl::CreateNode {
                    table: *table,
                    values: evaluators,
                    child: Box::new(child),
                }))
            }
            LogicalOperatorKind::DeleteNode { variable } => {
                let child = self.map_operator(op.child(0))?;
                let child_layout = layout_of(&op.child(0).schema);
                let variable = pos_of(&child_layout, &variable.name)?;
                Ok(PhysicalOperator::DeleteNode(ddl::DeleteNode {
                    variable,
                    child: Box::new(child),
                }))
            }
            LogicalOperatorKind::SetProperty { target, value } => {
                let child = self.map_operator(op.child(0))?;
                let child_layout = layout_of(&op.child(0).schema);
                let ExpressionKind::Property {
                    variable,
                    property_idx,
                    ..
                } = &target.kind
                else {
                    return Err(QuiverError::internal("SET target must be a property"));
                };
                let variable = pos_of(&child_layout, variable)?;
                let value = self.compile(value, &child_layout)?;
                Ok(PhysicalOperator::SetProperty(ddl::SetProperty {
                    variable,
                    column: *property_idx,
                    value,
                    child: Box::new(child),
                }))
            }
            LogicalOperatorKind::CopyFrom(copy_from) => self.map_copy_from(copy_from),
            LogicalOperatorKind::CopyTo { path, format } => {
                let child = self.map_operator(op.child(0))?;
                let child_layout = layout_of(&op.child(0).schema);
                let scope: Vec<&Expression> = op.child(0).schema.expressions_in_scope();
                let mut inputs = Vec::with_capacity(scope.len());
                let mut columns = Vec::with_capacity(scope.len());
                for expr in &scope {
                    inputs.push(pos_of(&child_layout, &expr.name)?);
                    columns.push((expr.name.clone(), expr.ty.clone()));
                }
                Ok(PhysicalOperator::CopyToSink(copy::CopyToSink::new(
                    path.clone(),
                    *format,
                    columns,
                    inputs,
                    child_layout.descriptor,
                    copy::CopyStaging::new(),
                    Box::new(child),
                )))
            }
            LogicalOperatorKind::Ddl(ddl_op) => {
                Ok(PhysicalOperator::DdlSink(ddl::DdlSink::new(ddl_op.clone())))
            }
            LogicalOperatorKind::DatabaseOp(db_op) => Ok(PhysicalOperator::DatabaseOpSink(
                ddl::DatabaseOpSink::new(db_op.clone(), Arc::clone(&self.session)),
            )),
            LogicalOperatorKind::StandingCall(option) => {
                Ok(PhysicalOperator::StandingCallSink(ddl::StandingCallSink::new(
                    *option,
                    Arc::clone(&self.session),
                )))
            }
        }
    }

    /// Paired scan over a sink's output table, laid out by the sink
    /// operator's own (single-group) schema
    fn ftable_scan(
        &self,
        op: &LogicalOperator,
        table: Arc<FactorizedTable>,
        ordered: bool,
        dependencies: Vec<PhysicalOperator>,
    ) -> QuiverResult<PhysicalOperator> {
        let own_layout = layout_of(&op.schema);
        let scope: Vec<&Expression> = op.schema.expressions_in_scope();
        let mut columns = Vec::with_capacity(scope.len());
        for expr in &scope {
            columns.push(Some(pos_of(&own_layout, &expr.name)?));
        }
        Ok(PhysicalOperator::FTableScan(scan::FTableScan {
            table,
            out_chunk: 0,
            columns,
            ordered,
            dependencies,
        }))
    }

    fn map_aggregate(
        &self,
        op: &LogicalOperator,
        keys: &[Expression],
        aggregates: &[Expression],
        _own_layout: &Layout,
    ) -> QuiverResult<PhysicalOperator> {
        let child = self.map_operator(op.child(0))?;
        let child_layout = layout_of(&op.child(0).schema);
        let mut key_slots = Vec::with_capacity(keys.len());
        let mut types = Vec::with_capacity(keys.len() + aggregates.len());
        for key in keys {
            key_slots.push(pos_of(&child_layout, &key.name)?);
            types.push(key.ty.clone());
        }
        let mut specs = Vec::with_capacity(aggregates.len());
        for agg in aggregates {
            let ExpressionKind::Aggregate {
                function,
                distinct,
                child: agg_child,
            } = &agg.kind
            else {
                return Err(QuiverError::internal(
                    "aggregate list holds a non-aggregate expression",
                ));
            };
            let descriptor = self.functions.aggregate(function)?;
            let input = agg_child
                .as_ref()
                .map(|c| pos_of(&child_layout, &c.name))
                .transpose()?;
            specs.push(aggregate::AggSpec {
                kind: descriptor.kind,
                distinct: *distinct,
                input,
                out_ty: agg.ty.clone(),
            });
            types.push(agg.ty.clone());
        }
        let scope_chunks: Vec<usize> = op
            .child(0)
            .schema
            .groups_in_scope()
            .into_iter()
            .collect();
        let output = FactorizedTable::new(types);
        let shared = aggregate::AggregateSharedState::new(Arc::clone(&output));
        let sink = PhysicalOperator::AggregateSink(aggregate::AggregateSink::new(
            key_slots,
            specs,
            scope_chunks,
            child_layout.descriptor,
            shared,
            Box::new(child),
        ));
        self.ftable_scan(op, output, false, vec![sink])
    }

    fn map_hash_join(
        &self,
        op: &LogicalOperator,
        join_keys: &[(Expression, Expression)],
        join_type: JoinType,
        mark: Option<&Expression>,
        sip: SidewaysInfoPassing,
        own_layout: &Layout,
    ) -> QuiverResult<PhysicalOperator> {
        let probe_logical = op.child(0);
        let build_logical = op.child(1);

        // Build side first: its layout supplies key and payload slots.
        let build_phys = self.map_operator(build_logical)?;
        let build_layout = layout_of(&build_logical.schema);
        let mut build_keys = Vec::with_capacity(join_keys.len());
        for (_, build_key) in join_keys {
            build_keys.push(pos_of(&build_layout, &build_key.name)?);
        }
        let key_names: Vec<&str> = join_keys.iter().map(|(_, b)| b.name.as_str()).collect();
        let payload_exprs: Vec<&Expression> = build_logical
            .schema
            .expressions_in_scope()
            .into_iter()
            .filter(|e| !key_names.contains(&e.name.as_str()))
            .filter(|e| own_layout.positions.contains_key(&e.name))
            .collect();
        let mut build_payloads = Vec::with_capacity(payload_exprs.len());
        for expr in &payload_exprs {
            build_payloads.push(pos_of(&build_layout, &expr.name)?);
        }

        // Realize probe-to-build SIP: mask the probe leaf scan of a
        // single node-variable key with the build keys.
        let mut build_chain = build_phys;
        if sip == SidewaysInfoPassing::ProbeToBuild && join_keys.len() == 1 {
            let (probe_key, build_key) = &join_keys[0];
            if let LogicalType::Node(table_id) = &probe_key.ty {
                let mask = scan::SemiMask::new();
                build_chain = PhysicalOperator::SemiMasker(hash_join::SemiMasker {
                    key: pos_of(&build_layout, &build_key.name)?,
                    node_table: *table_id,
                    mask: Arc::clone(&mask),
                    child: Box::new(build_chain),
                });
                self.pending_masks
                    .lock()
                    .insert(probe_key.name.clone(), mask);
            }
        }

        let table = hash_join::JoinHashTable::new(join_keys.len());
        let build_sink = PhysicalOperator::HashJoinBuild(hash_join::HashJoinBuild::new(
            build_keys,
            build_payloads,
            build_layout.descriptor,
            Arc::clone(&table),
            Box::new(build_chain),
        ));

        // Probe side after the mask is registered.
        let probe_phys = self.map_operator(probe_logical)?;
        let probe_layout = layout_of(&probe_logical.schema);
        let mut probe_keys = Vec::with_capacity(join_keys.len());
        for (probe_key, _) in join_keys {
            probe_keys.push(pos_of(&probe_layout, &probe_key.name)?);
        }
        let mut payload_out = Vec::with_capacity(payload_exprs.len());
        for expr in &payload_exprs {
            payload_out.push(pos_of(own_layout, &expr.name)?);
        }
        let out_chunk = payload_out.first().map(|p| p.chunk);
        let mark_out = mark.map(|m| pos_of(own_layout, &m.name)).transpose()?;

        Ok(PhysicalOperator::HashJoinProbe(hash_join::HashJoinProbe::new(
            probe_keys,
            join_type,
            payload_out,
            out_chunk,
            mark_out,
            table,
            Box::new(probe_phys),
            Box::new(build_sink),
        )))
    }

    fn map_copy_from(
        &self,
        copy_from: &crate::binder::BoundCopyFrom,
    ) -> QuiverResult<PhysicalOperator> {
        let descriptor = ResultSetDescriptor {
            chunk_types: vec![copy_from.column_types.clone()],
        };
        let outputs: Vec<DataPos> = (0..copy_from.column_types.len())
            .map(|i| DataPos::new(0, i))
            .collect();
        let source = PhysicalOperator::CopyFileScan(copy::CopyFileScan {
            path: copy_from.path.clone(),
            format: copy_from.format,
            options: copy_from.options.clone(),
            column_types: copy_from.column_types.clone(),
            out_chunk: 0,
            outputs: outputs.clone(),
            preserving_order: copy_from.preserving_order,
            shared: copy::CopyReaderShared::new(),
        });
        let staging = copy::CopyStaging::new();
        if copy_from.is_rel_table {
            let (src_table, dst_table) = {
                let catalog = self.catalog.read();
                let entry = catalog.rel_table_by_id(copy_from.table_id)?;
                (entry.src_table, entry.dst_table)
            };
            Ok(PhysicalOperator::CopyRelSink(copy::CopyRelSink::new(
                copy_from.table_id,
                src_table,
                dst_table,
                outputs,
                descriptor,
                staging,
                Box::new(source),
            )))
        } else {
            Ok(PhysicalOperator::CopyNodeSink(copy::CopyNodeSink::new(
                copy_from.table_id,
                outputs,
                descriptor,
                staging,
                Box::new(source),
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::*;
    use crate::ast::ParsedStatement;
    use crate::binder::Binder;
    use crate::catalog::{Catalog, PropertyDef};
    use crate::planner::{FixedStatistics, Planner};
    use std::collections::HashMap as StdHashMap;
    use std::path::PathBuf;

    fn mapper_fixture() -> (Arc<RwLock<Catalog>>, PlanMapper) {
        let mut catalog = Catalog::new();
        catalog
            .create_node_table(
                "person",
                vec![
                    PropertyDef {
                        name: "ID".to_string(),
                        ty: LogicalType::Int64,
                        primary_key: true,
                    },
                    PropertyDef {
                        name: "fName".to_string(),
                        ty: LogicalType::String,
                        primary_key: false,
                    },
                ],
            )
            .expect("person");
        catalog
            .create_rel_table("knows", "person", "person", vec![])
            .expect("knows");
        let catalog = Arc::new(RwLock::new(catalog));
        let functions = Arc::new(FunctionRegistry::with_builtins());
        let session = Arc::new(SessionState {
            databases: RwLock::new(StdHashMap::new()),
            current: RwLock::new("main".to_string()),
            settings: RwLock::new(StdHashMap::new()),
            data_dir: PathBuf::from("."),
            wal_immediate_sync: false,
        });
        let mapper = PlanMapper::new(
            Arc::clone(&catalog),
            functions,
            session,
            crate::vector::DEFAULT_VECTOR_CAPACITY as u64,
        );
        (catalog, mapper)
    }

    fn map_statement(statement: &ParsedStatement) -> QuiverResult<PhysicalPlan> {
        let (catalog, mapper) = mapper_fixture();
        let functions = FunctionRegistry::with_builtins();
        let params = StdHashMap::new();
        let bound = {
            let catalog = catalog.read();
            Binder::new(&catalog, &functions, &params).bind(statement)?
        };
        let stats = FixedStatistics {
            node_count: 10,
            avg_degree: 2.0,
        };
        let plan = Planner::new(&stats).plan(&bound)?;
        mapper.map_plan(&plan, &bound)
    }

    fn names(op: &PhysicalOperator, out: &mut Vec<&'static str>) {
        out.push(op.name());
        for child in op.children() {
            names(child, out);
        }
    }

    #[test]
    fn test_query_maps_to_collector_over_scan() {
        let q = match_(node("p", "person")).ret([prop("p", "fName")]).build();
        let plan = map_statement(&ParsedStatement::Query(q)).expect("map");
        let mut ops = Vec::new();
        names(&plan.root, &mut ops);
        assert_eq!(ops.first(), Some(&"RESULT_COLLECTOR"));
        assert!(ops.contains(&"SCAN_NODE_TABLE"));
        assert_eq!(plan.result_columns.len(), 1);
    }

    #[test]
    fn test_two_hop_maps_flatten_extend() {
        let q = match_(node("a", "person"))
            .hop(rel_to("knows"), node_any("b"))
            .ret([prop("b", "fName")])
            .build();
        let plan = map_statement(&ParsedStatement::Query(q)).expect("map");
        let mut ops = Vec::new();
        names(&plan.root, &mut ops);
        assert!(ops.contains(&"EXTEND"));
        assert!(ops.contains(&"FLATTEN"));
    }

    #[test]
    fn test_order_by_pairs_sink_and_ordered_scan() {
        let q = match_(node("p", "person"))
            .ret([prop("p", "ID")])
            .order_by(prop("p", "ID"), true)
            .build();
        let plan = map_statement(&ParsedStatement::Query(q)).expect("map");
        let mut ops = Vec::new();
        names(&plan.root, &mut ops);
        assert!(ops.contains(&"ORDER_BY"));
        assert!(ops.contains(&"FTABLE_SCAN"));
    }

    #[test]
    fn test_aggregate_maps_to_sink_scan_pair() {
        let q = match_(node("p", "person"))
            .ret([prop("p", "fName"), count_star()])
            .build();
        let plan = map_statement(&ParsedStatement::Query(q)).expect("map");
        let mut ops = Vec::new();
        names(&plan.root, &mut ops);
        assert!(ops.contains(&"AGGREGATE"));
        assert!(ops.contains(&"FTABLE_SCAN"));
    }

    #[test]
    fn test_ddl_maps_to_sink() {
        let plan = map_statement(&ParsedStatement::DropTable {
            name: "knows".to_string(),
        })
        .expect("map");
        assert_eq!(plan.root.name(), "DDL");
        assert!(plan.root.result_table().is_some());
    }

    #[test]
    fn test_copy_from_maps_to_pipeline() {
        let plan = map_statement(&ParsedStatement::CopyFrom {
            table: "person".to_string(),
            path: "people.csv".to_string(),
            format: crate::ast::FileFormat::Csv,
            options: crate::ast::CopyOptions::default(),
        })
        .expect("map");
        let mut ops = Vec::new();
        names(&plan.root, &mut ops);
        assert_eq!(ops, vec!["COPY_NODE", "COPY_FILE_SCAN"]);
    }
}
