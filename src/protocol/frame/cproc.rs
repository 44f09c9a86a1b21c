use super::{
    super::Error,
    asdu::{
        Asdu, Cause, CauseOfTransmission, CommonAddr, Identifier, InfoObjAddr, TypeID,
        VariableStruct,
    },
};
use bit_struct::*;
use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};
use std::io::Cursor;

// Control-direction process information: only the command families this
// client issues (single command, double command), execute-only, no time tag.

/// Single command information object (C_SC_NA_1)
#[derive(Debug, PartialEq)]
pub struct SingleCommandInfo {
    pub ioa: InfoObjAddr,
    pub sco: ObjectSCO,
}

impl SingleCommandInfo {
    pub fn new(addr: u16, v: bool, se: bool) -> Self {
        let ioa = InfoObjAddr::new(0, addr);
        let sco = ObjectSCO::new(se, u5!(0), u1!(0), v);
        SingleCommandInfo { ioa, sco }
    }
}

/// Double command information object (C_DC_NA_1)
#[derive(Debug, PartialEq)]
pub struct DoubleCommandInfo {
    pub ioa: InfoObjAddr,
    pub dco: ObjectDCO,
}

impl DoubleCommandInfo {
    pub fn new(addr: u16, v: u8, se: bool) -> Self {
        let v = v % 4;
        let ioa = InfoObjAddr::new(0, addr);
        let dco = ObjectDCO::new(se, u5!(0), u2::new(v).unwrap());
        DoubleCommandInfo { ioa, dco }
    }
}

bit_struct! {
    pub struct ObjectSCO(u8) {
        /// select flag: 0 execute, 1 select
        se: bool,
        /// output qualifier: 0 as configured, 1 short pulse, 2 long pulse, 3 persistent
        qu: u5,
        /// reserved, always 0
        res: u1,
        /// commanded state
        scs: bool,
    }
}

bit_struct! {
    pub struct ObjectDCO(u8) {
        /// select flag: 0 execute, 1 select
        se: bool,
        /// output qualifier: 0 as configured, 1 short pulse, 2 long pulse, 3 persistent
        qu: u5,
        /// commanded state: 1 OFF, 2 ON (0/3 are the indeterminate codes)
        dcs: u2,
    }
}

// SingleCmd sends a type identification [C_SC_NA_1], single information
// object only (SQ = 0). See companion standard 101, subclass 7.3.2.1.
// Cause of transmission:
// control direction: <6> activation, <8> deactivation
// monitoring direction: <7> activation con, <9> deactivation con,
//                       <44>..<47> unknown type/cot/ca/ioa
pub fn single_cmd(
    type_id: TypeID,
    cot: CauseOfTransmission,
    ca: CommonAddr,
    cmd: SingleCommandInfo,
) -> Result<Asdu, Error> {
    let mut cot = cot;
    let cause = cot.cause().get();

    if !(cause == Cause::Activation
        || cause == Cause::ActivationCon
        || cause == Cause::Deactivation
        || cause == Cause::DeactivationCon
        || cause == Cause::UnknownTypeID
        || cause == Cause::UnknownCOT
        || cause == Cause::UnknownCA
        || cause == Cause::UnknownIOA)
    {
        return Err(Error::ErrCmdCause(cot));
    }

    if !matches!(type_id, TypeID::C_SC_NA_1) {
        return Err(Error::ErrTypeIDNotMatch(type_id));
    }

    let variable_struct = VariableStruct::new(u1::new(0).unwrap(), u7::new(1).unwrap());

    let mut buf = BytesMut::with_capacity(3 + 1);
    buf.put_uint_le(cmd.ioa.raw().value() as u64, 3);
    buf.put_u8(cmd.sco.raw());

    Ok(Asdu {
        identifier: Identifier {
            type_id,
            variable_struct,
            cot,
            orig_addr: 0,
            common_addr: ca,
        },
        raw: buf.freeze(),
    })
}

// DoubleCmd sends a type identification [C_DC_NA_1], single information
// object only (SQ = 0). See companion standard 101, subclass 7.3.2.2.
// Cause of transmission as for SingleCmd.
pub fn double_cmd(
    type_id: TypeID,
    cot: CauseOfTransmission,
    ca: CommonAddr,
    cmd: DoubleCommandInfo,
) -> Result<Asdu, Error> {
    let mut cot = cot;
    let cause = cot.cause().get();

    if !(cause == Cause::Activation
        || cause == Cause::ActivationCon
        || cause == Cause::Deactivation
        || cause == Cause::DeactivationCon
        || cause == Cause::UnknownTypeID
        || cause == Cause::UnknownCOT
        || cause == Cause::UnknownCA
        || cause == Cause::UnknownIOA)
    {
        return Err(Error::ErrCmdCause(cot));
    }

    if !matches!(type_id, TypeID::C_DC_NA_1) {
        return Err(Error::ErrTypeIDNotMatch(type_id));
    }

    let variable_struct = VariableStruct::new(u1::new(0).unwrap(), u7::new(1).unwrap());

    let mut buf = BytesMut::with_capacity(3 + 1);
    buf.put_uint_le(cmd.ioa.raw().value() as u64, 3);
    buf.put_u8(cmd.dco.raw());

    Ok(Asdu {
        identifier: Identifier {
            type_id,
            variable_struct,
            cot,
            orig_addr: 0,
            common_addr: ca,
        },
        raw: buf.freeze(),
    })
}

impl Asdu {
    // [C_SC_NA_1] single command information object
    pub fn get_single_cmd(&mut self) -> Result<SingleCommandInfo, Error> {
        if !matches!(self.identifier.type_id, TypeID::C_SC_NA_1) {
            return Err(Error::ErrTypeIDNotMatch(self.identifier.type_id));
        }
        let mut rdr = Cursor::new(&self.raw);
        let ioa =
            InfoObjAddr::try_from(u24::new(rdr.read_u24::<LittleEndian>()?).unwrap()).unwrap();
        let sco = ObjectSCO::try_from(rdr.read_u8()?).unwrap();
        Ok(SingleCommandInfo { ioa, sco })
    }

    // [C_DC_NA_1] double command information object
    pub fn get_double_cmd(&mut self) -> Result<DoubleCommandInfo, Error> {
        if !matches!(self.identifier.type_id, TypeID::C_DC_NA_1) {
            return Err(Error::ErrTypeIDNotMatch(self.identifier.type_id));
        }
        let mut rdr = Cursor::new(&self.raw);
        let ioa =
            InfoObjAddr::try_from(u24::new(rdr.read_u24::<LittleEndian>()?).unwrap()).unwrap();
        let dco = ObjectDCO::try_from(rdr.read_u8()?).unwrap();
        Ok(DoubleCommandInfo { ioa, dco })
    }
}
