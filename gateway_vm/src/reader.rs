use alloy::primitives::Bytes;

use crate::{
    error::VmError,
    ops::{opcode, LoopFlags, Op},
    program::GatewayProgram,
};

/// A cursor over the ops of an encoded program.
#[derive(Clone, Debug)]
pub struct ProgramReader {
    ops: Bytes,
    inputs: Vec<Bytes>,
    pos: usize,
}

impl ProgramReader {
    pub fn new(ops: Bytes, inputs: Vec<Bytes>) -> Self {
        Self {
            ops,
            inputs,
            pos: 0,
        }
    }

    /// Reads the ABI encoding of a program, as found on the stack of a
    /// running machine.
    pub fn from_encoded(data: &[u8]) -> Result<Self, VmError> {
        let program = GatewayProgram::decode(data)?;
        let (ops, inputs) = program.into_parts();
        Ok(Self::new(ops, inputs))
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.ops.len() - self.pos
    }

    fn check_read(&self, wanted: usize) -> Result<(), VmError> {
        match wanted <= self.remaining() {
            true => Ok(()),
            false => Err(VmError::ReadOverrun {
                pos: self.pos,
                wanted,
                remaining: self.remaining(),
            }),
        }
    }

    pub fn read_byte(&mut self) -> Result<u8, VmError> {
        self.check_read(1)?;
        let b = self.ops[self.pos];
        self.pos += 1;
        Ok(b)
    }

    /// Reads a big endian u16.
    pub fn read_short(&mut self) -> Result<u16, VmError> {
        self.check_read(2)?;
        let v = u16::from_be_bytes([self.ops[self.pos], self.ops[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Bytes, VmError> {
        self.check_read(n)?;
        let v = Bytes::from(self.ops.0.slice(self.pos..self.pos + n));
        self.pos += n;
        Ok(v)
    }

    /// Reads a one byte input index and returns the referenced input.
    pub fn read_input(&mut self) -> Result<Bytes, VmError> {
        let index = self.read_byte()?;
        self.inputs
            .get(index as usize)
            .cloned()
            .ok_or(VmError::InvalidInput {
                index,
                inputs: self.inputs.len(),
            })
    }

    fn read_exit(&mut self) -> Result<u8, VmError> {
        let pos = self.pos;
        match self.read_byte()? {
            0 => Err(VmError::InvalidExitCode { pos }),
            exit => Ok(exit),
        }
    }

    pub fn read_op(&mut self) -> Result<Op, VmError> {
        let pos = self.pos;
        let op = match self.read_byte()? {
            opcode::PUSH_INPUT => Op::PushInput(self.read_input()?),
            opcode::PUSH_OUTPUT => Op::PushOutput(self.read_byte()?),
            opcode::PUSH_SLOT => Op::PushSlot,
            opcode::PUSH_TARGET => Op::PushTarget,
            opcode::TARGET => Op::Target,
            opcode::SET_OUTPUT => Op::SetOutput(self.read_byte()?),
            opcode::EVAL_INLINE => Op::EvalInline,
            opcode::EVAL_LOOP => Op::EvalLoop {
                back: self.read_byte()?,
                flags: LoopFlags::from_bits_truncate(self.read_byte()?),
            },
            opcode::REQ_NONZERO => Op::RequireNonzero {
                back: self.read_byte()?,
                exit: self.read_exit()?,
            },
            opcode::REQ_CONTRACT => Op::RequireContract {
                exit: self.read_exit()?,
            },
            opcode::READ_SLOTS => Op::ReadSlots(self.read_byte()?),
            opcode::READ_BYTES => Op::ReadBytes,
            opcode::READ_ARRAY => Op::ReadArray {
                step: self.read_short()?,
            },
            opcode::SLOT_ZERO => Op::SlotZero,
            opcode::SLOT_ADD => Op::SlotAdd,
            opcode::SLOT_FOLLOW => Op::SlotFollow,
            opcode::DUP => Op::Dup(self.read_byte()?),
            opcode::POP => Op::Pop,
            opcode::SWAP => Op::Swap(self.read_byte()?),
            opcode::KECCAK => Op::Keccak,
            opcode::CONCAT => Op::Concat,
            opcode::SLICE => Op::Slice {
                offset: self.read_short()?,
                length: self.read_short()?,
            },
            opcode::DEBUG => Op::Debug(self.read_input()?),
            op => return Err(VmError::UnknownOpcode { op, pos }),
        };
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::U256;

    use super::*;
    use crate::program::GatewayProgram;

    fn reader(ops: &[u8], inputs: &[&[u8]]) -> ProgramReader {
        ProgramReader::new(
            Bytes::copy_from_slice(ops),
            inputs.iter().map(|i| Bytes::copy_from_slice(i)).collect(),
        )
    }

    #[test]
    fn reads_operands_big_endian() {
        let mut r = reader(&[opcode::SLICE, 0x01, 0x02, 0x00, 0x20], &[]);
        assert_eq!(
            r.read_op().unwrap(),
            Op::Slice {
                offset: 0x0102,
                length: 0x20
            }
        );
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn resolves_inputs() {
        let mut r = reader(
            &[opcode::PUSH_INPUT, 1, opcode::DEBUG, 0],
            &[b"label".as_slice(), b"value".as_slice()],
        );
        assert_eq!(
            r.read_op().unwrap(),
            Op::PushInput(Bytes::from_static(b"value"))
        );
        assert_eq!(
            r.read_op().unwrap(),
            Op::Debug(Bytes::from_static(b"label"))
        );
    }

    #[test]
    fn rejects_bad_input_index() {
        let mut r = reader(&[opcode::PUSH_INPUT, 2], &[b"a".as_slice(), b"b".as_slice()]);
        assert!(matches!(
            r.read_op(),
            Err(VmError::InvalidInput {
                index: 2,
                inputs: 2
            })
        ));
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut r = reader(&[opcode::POP, 99], &[]);
        assert_eq!(r.read_op().unwrap(), Op::Pop);
        assert!(matches!(
            r.read_op(),
            Err(VmError::UnknownOpcode { op: 99, pos: 1 })
        ));
    }

    #[test]
    fn rejects_truncated_operands() {
        let mut r = reader(&[opcode::READ_ARRAY, 0x01], &[]);
        assert!(matches!(
            r.read_op(),
            Err(VmError::ReadOverrun {
                wanted: 2,
                remaining: 1,
                ..
            })
        ));
    }

    #[test]
    fn rejects_zero_exit_codes() {
        let mut r = reader(&[opcode::REQ_CONTRACT, 0], &[]);
        assert!(matches!(
            r.read_op(),
            Err(VmError::InvalidExitCode { pos: 1 })
        ));
    }

    #[test]
    fn reads_built_programs() {
        let mut program = GatewayProgram::new();
        program.push(U256::from(7)).read(2).eval_loop(3, LoopFlags::STOP_ON_SUCCESS);

        let mut r = ProgramReader::from_encoded(&program.encode().unwrap()).unwrap();
        let mut ops = Vec::new();
        while r.remaining() > 0 {
            ops.push(r.read_op().unwrap());
        }

        assert_eq!(
            ops,
            vec![
                Op::PushInput(Bytes::from(U256::from(7).to_be_bytes::<32>().to_vec())),
                Op::ReadSlots(2),
                Op::EvalLoop {
                    back: 3,
                    flags: LoopFlags::STOP_ON_SUCCESS
                },
            ]
        );
    }
}
