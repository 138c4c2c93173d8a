//! The stack machine.

use std::{collections::HashMap, sync::Arc};

use alloy::primitives::{keccak256, Address, Bytes, U256};
use futures::future::{self, BoxFuture};
use futures::FutureExt as _;
use tracing::{debug, trace};

use crate::{
    error::VmError,
    needs::{Need, NeedSelector},
    ops::{LoopFlags, Op},
    program::GatewayRequest,
    reader::ProgramReader,
    storage::{StorageSource, VmLimits},
    value::{slice_bytes, MaybeBytes},
};

/// The state of an evaluation, and its result once the evaluation ends.
#[derive(Debug)]
pub struct MachineState {
    pub target: Address,
    pub slot: U256,
    pub stack: Vec<MaybeBytes>,
    pub outputs: Vec<MaybeBytes>,
    /// 0 unless a requirement failed.
    pub exit_code: u8,
    /// Every state access in program order, sub-programs included.
    pub needs: Vec<Need>,
    // Whether each distinct target so far must be a contract.
    targets: HashMap<Address, bool>,
    max_stack: usize,
}

impl MachineState {
    fn new(outputs: usize, limits: &VmLimits) -> Self {
        Self {
            target: Address::ZERO,
            slot: U256::ZERO,
            stack: Vec::new(),
            outputs: vec![MaybeBytes::default(); outputs],
            exit_code: 0,
            needs: Vec::new(),
            targets: HashMap::new(),
            max_stack: limits.max_stack,
        }
    }

    /// Forces every output. Unset outputs are empty.
    pub async fn resolve_outputs(&self) -> Result<Vec<Bytes>, VmError> {
        future::try_join_all(self.outputs.iter().map(MaybeBytes::resolve)).await
    }

    #[cfg(test)]
    fn target_count(&self) -> usize {
        self.targets.len()
    }

    fn push(&mut self, v: MaybeBytes) -> Result<(), VmError> {
        if self.stack.len() >= self.max_stack {
            return Err(VmError::StackOverflow {
                max: self.max_stack,
            });
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> Result<MaybeBytes, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow {
            back: 0,
            depth: 0,
        })
    }

    fn index_back(&self, back: u8) -> Result<usize, VmError> {
        let depth = self.stack.len();
        match (back as usize) < depth {
            true => Ok(depth - 1 - back as usize),
            false => Err(VmError::StackUnderflow {
                back: back as usize,
                depth,
            }),
        }
    }

    fn peek(&self, back: u8) -> Result<&MaybeBytes, VmError> {
        Ok(&self.stack[self.index_back(back)?])
    }

    fn output_index(&self, index: u8) -> Result<usize, VmError> {
        match (index as usize) < self.outputs.len() {
            true => Ok(index as usize),
            false => Err(VmError::InvalidOutput {
                index,
                outputs: self.outputs.len(),
            }),
        }
    }

    fn set_target(&mut self, target: Address, max_targets: usize) -> Result<(), VmError> {
        self.target = target;
        self.slot = U256::ZERO;

        let required = self.register_target(target, max_targets)?;
        self.needs.push(Need::account(target, required));
        Ok(())
    }

    fn register_target(&mut self, target: Address, max_targets: usize) -> Result<bool, VmError> {
        if let Some(required) = self.targets.get(&target) {
            return Ok(*required);
        }
        if self.targets.len() >= max_targets {
            return Err(VmError::TooManyTargets {
                target,
                max: max_targets,
            });
        }
        self.targets.insert(target, false);
        Ok(false)
    }

    /// Marks the current target as required, upgrading the account needs
    /// already recorded for it.
    fn require_target(&mut self, max_targets: usize) -> Result<(), VmError> {
        let target = self.target;
        if !self.targets.contains_key(&target) {
            self.register_target(target, max_targets)?;
            self.needs.push(Need::account(target, true));
        }
        self.targets.insert(target, true);

        for need in self.needs.iter_mut().filter(|n| n.target == target) {
            if let NeedSelector::Account { required } = &mut need.selector {
                *required = true;
            }
        }
        Ok(())
    }
}

/// Evaluates requests against a [`StorageSource`].
#[derive(Debug)]
pub struct GatewayVm<S> {
    source: Arc<S>,
    limits: VmLimits,
}

impl<S> Clone for GatewayVm<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            limits: self.limits,
        }
    }
}

impl<S: StorageSource> GatewayVm<S> {
    pub fn new(source: Arc<S>) -> Self {
        let limits = source.limits();
        Self { source, limits }
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Runs `request` until its ops are exhausted or a requirement fails.
    ///
    /// Storage values read along the way stay deferred in the returned
    /// state; use [`MachineState::resolve_outputs`] to force them.
    pub async fn evaluate(&self, request: &GatewayRequest) -> Result<MachineState, VmError> {
        let (ops, inputs) = request.clone().into_program().into_parts();
        let mut reader = ProgramReader::new(ops, inputs);
        let outputs = match reader.remaining() {
            0 => 0,
            _ => reader.read_byte()?,
        };

        let mut state = MachineState::new(outputs as usize, &self.limits);
        self.eval_reader(reader, &mut state).await?;

        debug!(
            exit_code = state.exit_code,
            needs = state.needs.len(),
            targets = state.targets.len(),
            "evaluated request"
        );
        Ok(state)
    }

    fn eval_reader<'a>(
        &'a self,
        mut reader: ProgramReader,
        state: &'a mut MachineState,
    ) -> BoxFuture<'a, Result<(), VmError>> {
        async move {
            while reader.remaining() > 0 && state.exit_code == 0 {
                let op = reader.read_op()?;
                trace!(pos = reader.pos(), ?op, "step");
                self.step(op, state).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn step(&self, op: Op, state: &mut MachineState) -> Result<(), VmError> {
        match op {
            Op::PushInput(v) => state.push(v.into())?,
            Op::PushOutput(index) => {
                let v = state.outputs[state.output_index(index)?].clone();
                state.push(v)?;
            }
            Op::PushSlot => {
                let word = Bytes::from(state.slot.to_be_bytes::<32>().to_vec());
                state.push(word.into())?;
            }
            Op::PushTarget => {
                let target = Bytes::from(state.target.to_vec());
                state.push(target.into())?;
            }
            Op::Target => {
                let v = state.pop()?.resolve().await?;
                state.set_target(address_from_bytes(&v), self.limits.max_unique_targets)?;
            }
            Op::SetOutput(index) => {
                let i = state.output_index(index)?;
                state.outputs[i] = state.pop()?;
            }
            Op::EvalInline => {
                let program = state.pop()?.resolve().await?;
                let reader = ProgramReader::from_encoded(&program)?;
                self.eval_reader(reader, state).await?;
            }
            Op::EvalLoop { back, flags } => self.eval_loop(back, flags, state).await?,
            Op::RequireNonzero { back, exit } => {
                let v = state.peek(back)?.resolve().await?;
                if v.iter().all(|b| *b == 0) {
                    state.exit_code = exit;
                }
            }
            Op::RequireContract { exit } => {
                state.require_target(self.limits.max_unique_targets)?;
                if !self.source.is_contract(state.target).await? {
                    state.exit_code = exit;
                }
            }
            Op::ReadSlots(count) => {
                let count = count as usize;
                self.check_read(count * 32)?;
                let slot = state.slot;
                let parts = (0..count)
                    .map(|i| self.read_word(state, slot.wrapping_add(U256::from(i))))
                    .collect();
                state.push(MaybeBytes::concat_all(parts))?;
            }
            Op::ReadBytes => {
                let v = self.read_bytes(state).await?;
                state.push(v)?;
            }
            Op::ReadArray { step } => {
                let v = self.read_array(step, state).await?;
                state.push(v)?;
            }
            Op::SlotZero => state.slot = U256::ZERO,
            Op::SlotAdd => {
                let v = state.pop()?.resolve().await?;
                if v.len() > 32 {
                    return Err(VmError::SlotValueTooLong { len: v.len() });
                }
                state.slot = state.slot.wrapping_add(U256::from_be_slice(&v));
            }
            Op::SlotFollow => {
                let key = state.pop()?.resolve().await?;
                state.slot = follow(&key, state.slot);
            }
            Op::Dup(back) => {
                let v = state.peek(back)?.clone();
                state.push(v)?;
            }
            Op::Pop => {
                state.pop()?;
            }
            Op::Swap(back) => {
                let i = state.index_back(back)?;
                let top = state.stack.len() - 1;
                state.stack.swap(i, top);
            }
            Op::Keccak => {
                let v = state.pop()?;
                state.push(v.map(|b| Ok(Bytes::from(keccak256(&b).to_vec()))))?;
            }
            Op::Concat => {
                let last = state.pop()?;
                let first = state.pop()?;
                state.push(MaybeBytes::concat(first, last))?;
            }
            Op::Slice { offset, length } => {
                let v = state.pop()?;
                state.push(v.map(move |b| slice_bytes(&b, offset as usize, length as usize)))?;
            }
            Op::Debug(label) => {
                debug!(
                    label = %String::from_utf8_lossy(&label),
                    target = %state.target,
                    slot = %state.slot,
                    stack = ?state.stack,
                    exit_code = state.exit_code,
                    "machine state"
                );
            }
        }
        Ok(())
    }

    async fn eval_loop(
        &self,
        back: u8,
        flags: LoopFlags,
        state: &mut MachineState,
    ) -> Result<(), VmError> {
        let program = state.pop()?.resolve().await?;
        let reader = ProgramReader::from_encoded(&program)?;

        let count = (back as usize).min(state.stack.len());
        let args = state.stack.split_off(state.stack.len() - count);

        let target = state.target;
        let slot = state.slot;
        let stack = std::mem::take(&mut state.stack);
        let mut acquired = None;

        for arg in args.into_iter().rev() {
            state.target = target;
            state.slot = slot;
            state.stack = vec![arg];
            state.exit_code = 0;

            self.eval_reader(reader.clone(), state).await?;

            let stop = match state.exit_code {
                0 => flags.contains(LoopFlags::STOP_ON_SUCCESS),
                _ => flags.contains(LoopFlags::STOP_ON_FAILURE),
            };
            if stop {
                if flags.contains(LoopFlags::ACQUIRE_STATE) {
                    acquired = Some((state.target, state.slot, std::mem::take(&mut state.stack)));
                }
                break;
            }
        }

        state.exit_code = 0;
        (state.target, state.slot, state.stack) = acquired.unwrap_or((target, slot, stack));
        Ok(())
    }

    fn check_read(&self, len: usize) -> Result<(), VmError> {
        match len <= self.limits.max_read_bytes {
            true => Ok(()),
            false => Err(VmError::ReadTooLarge {
                len,
                max: self.limits.max_read_bytes,
            }),
        }
    }

    /// Records the need and returns the deferred read.
    fn read_word(&self, state: &mut MachineState, slot: U256) -> MaybeBytes {
        let target = state.target;
        state.needs.push(Need::slot(target, slot));

        let source = self.source.clone();
        MaybeBytes::deferred(async move {
            let word = source.get_storage(target, slot).await?;
            Ok(Bytes::from(word.to_vec()))
        })
    }

    async fn read_bytes(&self, state: &mut MachineState) -> Result<MaybeBytes, VmError> {
        let slot = state.slot;
        let header = self.read_word(state, slot).resolve().await?;
        let first = header[31];

        // Short values live in the high bytes of the header itself.
        if first & 1 == 0 {
            let len = (first >> 1) as usize;
            return Ok(slice_bytes(&header, 0, len)?.into());
        }

        let len = U256::from_be_slice(&header) >> 1;
        let len = usize::try_from(len).unwrap_or(usize::MAX);
        self.check_read(len)?;

        let base = data_slot(slot);
        let parts = (0..len.div_ceil(32))
            .map(|i| self.read_word(state, base.wrapping_add(U256::from(i))))
            .collect();
        Ok(MaybeBytes::concat_all(parts).map(move |b| slice_bytes(&b, 0, len)))
    }

    async fn read_array(&self, step: u16, state: &mut MachineState) -> Result<MaybeBytes, VmError> {
        if step == 0 {
            return Err(VmError::InvalidArrayStep);
        }
        let step = step as usize;

        let slot = state.slot;
        let header = self.read_word(state, slot).resolve().await?;
        let count = usize::try_from(U256::from_be_slice(&header)).unwrap_or(usize::MAX);
        let words = match step < 32 {
            true => count.div_ceil(32 / step),
            false => count.saturating_mul(step.div_ceil(32)),
        };
        self.check_read(words.saturating_mul(32))?;

        let base = data_slot(slot);
        let mut parts = Vec::with_capacity(words + 1);
        parts.push(MaybeBytes::Ready(header));
        parts.extend((0..words).map(|i| self.read_word(state, base.wrapping_add(U256::from(i)))));
        Ok(MaybeBytes::concat_all(parts))
    }
}

/// A target is the low 20 bytes of a word. Shorter values are left padded
/// first.
fn address_from_bytes(v: &[u8]) -> Address {
    if v.len() >= 32 {
        return Address::from_slice(&v[12..32]);
    }
    let mut word = [0u8; 32];
    word[32 - v.len()..].copy_from_slice(v);
    Address::from_slice(&word[12..])
}

/// Where the data of a dynamic value stored at `slot` begins.
fn data_slot(slot: U256) -> U256 {
    U256::from_be_bytes(keccak256(slot.to_be_bytes::<32>()).0)
}

/// The slot of `key` in a mapping rooted at `slot`.
fn follow(key: &[u8], slot: U256) -> U256 {
    let mut preimage = Vec::with_capacity(key.len() + 32);
    preimage.extend_from_slice(key);
    preimage.extend_from_slice(&slot.to_be_bytes::<32>());
    U256::from_be_bytes(keccak256(preimage).0)
}
