//! Building and encoding programs.

use std::ops::{Deref, DerefMut};

use alloy::{
    primitives::{Address, Bytes, U256},
    sol_types::SolValue,
};

use crate::{
    error::VmError,
    ops::{exit, opcode, LoopFlags},
};

/// Inputs are referenced by a one byte index.
pub const MAX_INPUTS: usize = 256;

/// A program under construction, or a decoded one.
///
/// Builder methods append ops and return `&mut Self` so calls chain. Values
/// pushed onto the stack are stored once in the input table and referenced by
/// index.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct GatewayProgram {
    ops: Vec<u8>,
    inputs: Vec<Bytes>,
    // Set once an input no longer fits, reported by `encode`.
    input_overflow: bool,
}

impl GatewayProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes the ABI tuple `(bytes ops, bytes[] inputs)`.
    pub fn decode(data: &[u8]) -> Result<Self, VmError> {
        let (ops, inputs) = <(Bytes, Vec<Bytes>)>::abi_decode_params(data, true)
            .map_err(|e| VmError::InvalidEncoding(e.to_string()))?;
        if inputs.len() > MAX_INPUTS {
            return Err(VmError::TooManyInputs { max: MAX_INPUTS });
        }

        Ok(Self {
            ops: ops.to_vec(),
            inputs,
            input_overflow: false,
        })
    }

    /// Encodes the program as the ABI tuple `(bytes ops, bytes[] inputs)`.
    pub fn encode(&self) -> Result<Bytes, VmError> {
        if self.input_overflow {
            return Err(VmError::TooManyInputs { max: MAX_INPUTS });
        }

        Ok((Bytes::from(self.ops.clone()), self.inputs.clone())
            .abi_encode_params()
            .into())
    }

    pub fn ops(&self) -> &[u8] {
        &self.ops
    }

    pub fn inputs(&self) -> &[Bytes] {
        &self.inputs
    }

    pub fn into_parts(self) -> (Bytes, Vec<Bytes>) {
        (self.ops.into(), self.inputs)
    }

    fn op(&mut self, op: u8) -> &mut Self {
        self.ops.push(op);
        self
    }

    fn byte(&mut self, b: u8) -> &mut Self {
        self.ops.push(b);
        self
    }

    fn short(&mut self, v: u16) -> &mut Self {
        self.ops.extend_from_slice(&v.to_be_bytes());
        self
    }

    fn add_input(&mut self, v: Bytes) -> u8 {
        if let Some(i) = self.inputs.iter().position(|x| *x == v) {
            return i as u8;
        }
        if self.inputs.len() == MAX_INPUTS {
            self.input_overflow = true;
            return 0;
        }
        self.inputs.push(v);
        (self.inputs.len() - 1) as u8
    }

    /// Pushes a 32 byte word.
    pub fn push(&mut self, v: U256) -> &mut Self {
        self.push_bytes(v.to_be_bytes::<32>().to_vec())
    }

    pub fn push_bytes(&mut self, v: impl Into<Bytes>) -> &mut Self {
        let i = self.add_input(v.into());
        self.op(opcode::PUSH_INPUT).byte(i)
    }

    pub fn push_str(&mut self, s: &str) -> &mut Self {
        self.push_bytes(s.as_bytes().to_vec())
    }

    /// Pushes an address left padded to a word, the way `TARGET` expects it.
    pub fn push_address(&mut self, a: Address) -> &mut Self {
        self.push_bytes(a.into_word().to_vec())
    }

    /// Pushes the encoding of `program`, for `eval` or `eval_loop`.
    pub fn push_program(&mut self, program: &GatewayProgram) -> &mut Self {
        match program.encode() {
            Ok(encoded) => self.push_bytes(encoded),
            Err(_) => {
                self.input_overflow = true;
                self
            }
        }
    }

    pub fn push_output(&mut self, index: u8) -> &mut Self {
        self.op(opcode::PUSH_OUTPUT).byte(index)
    }

    pub fn push_slot(&mut self) -> &mut Self {
        self.op(opcode::PUSH_SLOT)
    }

    pub fn push_target(&mut self) -> &mut Self {
        self.op(opcode::PUSH_TARGET)
    }

    /// Pops the target address. Resets the slot to zero.
    pub fn target(&mut self) -> &mut Self {
        self.op(opcode::TARGET)
    }

    pub fn set_target(&mut self, a: Address) -> &mut Self {
        self.push_address(a).target()
    }

    pub fn set_output(&mut self, index: u8) -> &mut Self {
        self.op(opcode::SET_OUTPUT).byte(index)
    }

    pub fn zero_slot(&mut self) -> &mut Self {
        self.op(opcode::SLOT_ZERO)
    }

    /// Adds the popped value to the slot.
    pub fn add_slot(&mut self) -> &mut Self {
        self.op(opcode::SLOT_ADD)
    }

    pub fn set_slot(&mut self, slot: U256) -> &mut Self {
        self.zero_slot().offset(slot)
    }

    pub fn offset(&mut self, by: U256) -> &mut Self {
        self.push(by).add_slot()
    }

    /// Follows a mapping: `slot = keccak(key . slot)` where the key is popped.
    pub fn follow(&mut self) -> &mut Self {
        self.op(opcode::SLOT_FOLLOW)
    }

    /// Moves to the element of a dynamic array whose index is on the stack:
    /// `slot = keccak(slot) + index`.
    pub fn follow_index(&mut self) -> &mut Self {
        self.push_slot().keccak().zero_slot().add_slot().add_slot()
    }

    pub fn read(&mut self, slots: u8) -> &mut Self {
        self.op(opcode::READ_SLOTS).byte(slots)
    }

    /// Reads a `bytes` or `string` stored at the slot.
    pub fn read_bytes(&mut self) -> &mut Self {
        self.op(opcode::READ_BYTES)
    }

    /// Reads a dynamic array with elements of `step` bytes: the length word
    /// followed by the data words.
    pub fn read_array(&mut self, step: u16) -> &mut Self {
        self.op(opcode::READ_ARRAY).short(step)
    }

    pub fn require_contract(&mut self) -> &mut Self {
        self.require_contract_with(exit::NOT_A_CONTRACT)
    }

    pub fn require_contract_with(&mut self, exit: u8) -> &mut Self {
        self.op(opcode::REQ_CONTRACT).byte(exit)
    }

    pub fn require_nonzero(&mut self, back: u8) -> &mut Self {
        self.require_nonzero_with(back, exit::ZERO_VALUE)
    }

    pub fn require_nonzero_with(&mut self, back: u8, exit: u8) -> &mut Self {
        self.op(opcode::REQ_NONZERO).byte(back).byte(exit)
    }

    /// Concatenates the top two values, the deeper one first.
    pub fn concat(&mut self) -> &mut Self {
        self.op(opcode::CONCAT)
    }

    pub fn keccak(&mut self) -> &mut Self {
        self.op(opcode::KECCAK)
    }

    pub fn slice(&mut self, offset: u16, length: u16) -> &mut Self {
        self.op(opcode::SLICE).short(offset).short(length)
    }

    pub fn dup(&mut self, back: u8) -> &mut Self {
        self.op(opcode::DUP).byte(back)
    }

    pub fn pop(&mut self) -> &mut Self {
        self.op(opcode::POP)
    }

    pub fn swap(&mut self, back: u8) -> &mut Self {
        self.op(opcode::SWAP).byte(back)
    }

    /// Runs the popped program against the current state.
    pub fn eval(&mut self) -> &mut Self {
        self.op(opcode::EVAL_INLINE)
    }

    /// Runs the popped program once for each of up to `back` values below
    /// it.
    pub fn eval_loop(&mut self, back: u8, flags: LoopFlags) -> &mut Self {
        self.op(opcode::EVAL_LOOP).byte(back).byte(flags.bits())
    }

    pub fn debug(&mut self, label: &str) -> &mut Self {
        let i = self.add_input(label.as_bytes().to_vec().into());
        self.op(opcode::DEBUG).byte(i)
    }
}

/// A program whose first op byte is the number of outputs it produces.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GatewayRequest(GatewayProgram);

impl GatewayRequest {
    pub fn new(outputs: u8) -> Self {
        let mut program = GatewayProgram::new();
        program.byte(outputs);
        Self(program)
    }

    pub fn decode(data: &[u8]) -> Result<Self, VmError> {
        GatewayProgram::decode(data).map(Self)
    }

    pub fn from_parts(ops: Bytes, inputs: Vec<Bytes>) -> Result<Self, VmError> {
        if inputs.len() > MAX_INPUTS {
            return Err(VmError::TooManyInputs { max: MAX_INPUTS });
        }

        Ok(Self(GatewayProgram {
            ops: ops.to_vec(),
            inputs,
            input_overflow: false,
        }))
    }

    /// Number of outputs, or 0 for an empty request.
    pub fn output_count(&self) -> u8 {
        self.0.ops.first().copied().unwrap_or_default()
    }

    pub fn into_program(self) -> GatewayProgram {
        self.0
    }
}

impl Deref for GatewayRequest {
    type Target = GatewayProgram;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for GatewayRequest {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
