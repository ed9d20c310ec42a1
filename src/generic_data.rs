//! Generic-data payloads of the GRB space weather packets.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::model::from_j2000;

pub const GENERIC_HEADER_LEN: usize = 21;

pub const XRAY_APID: u16 = 0x383;
pub const PROTON_LOW_APID: u16 = 0x410;
pub const PROTON_MED_HI_APID: u16 = 0x421;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GenericHeader {
    pub compression: u8,
    pub seconds: u32,
    pub microseconds: u32,
    pub reserved: u64,
    pub data_unit_sequence: u32,
}

impl GenericHeader {
    pub fn parse(bytes: &[u8]) -> Result<(Self, &[u8])> {
        if bytes.len() < GENERIC_HEADER_LEN {
            bail!("generic header needs {} bytes, got {}", GENERIC_HEADER_LEN, bytes.len());
        }
        let be32 = |at: usize| u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&bytes[9..17]);

        let header = Self {
            compression: bytes[0],
            seconds: be32(1),
            microseconds: be32(5),
            reserved: u64::from_be_bytes(reserved),
            data_unit_sequence: be32(17),
        };
        Ok((header, &bytes[GENERIC_HEADER_LEN..]))
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        from_j2000(i64::from(self.seconds), self.microseconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Instrument {
    XRay,
    ProtonLow,
    ProtonMedHi,
}

impl Instrument {
    pub fn from_apid(apid: u16) -> Option<Self> {
        match apid {
            XRAY_APID => Some(Instrument::XRay),
            PROTON_LOW_APID => Some(Instrument::ProtonLow),
            PROTON_MED_HI_APID => Some(Instrument::ProtonMedHi),
            _ => None,
        }
    }

    fn fields(self) -> &'static [Field] {
        match self {
            Instrument::XRay => XRAY_FIELDS,
            Instrument::ProtonLow => PROTON_LOW_FIELDS,
            Instrument::ProtonMedHi => PROTON_MED_HI_FIELDS,
        }
    }

    /// Headline reading, where the instrument has one.
    pub fn headline(self, fields: &FieldSet) -> Option<f64> {
        match self {
            Instrument::XRay => fields.get("irradiance_xrsb1")?.as_f64(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum DataType {
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

impl DataType {
    fn width(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::U32 | DataType::F32 => 4,
            DataType::U64 | DataType::F64 => 8,
        }
    }

    fn read(self, b: &[u8]) -> FieldValue {
        match self {
            DataType::U8 => FieldValue::Unsigned(u64::from(b[0])),
            DataType::U16 => FieldValue::Unsigned(u64::from(u16::from_le_bytes([b[0], b[1]]))),
            DataType::U32 => FieldValue::Unsigned(u64::from(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
            DataType::U64 => {
                FieldValue::Unsigned(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            }
            DataType::F32 => FieldValue::Float(f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))),
            DataType::F64 => FieldValue::Float(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])),
        }
    }
}

struct Field {
    name: &'static str,
    data_type: DataType,
    size: usize,
    offset: usize,
}

const fn field(name: &'static str, data_type: DataType, size: usize, offset: usize) -> Field {
    Field { name, data_type, size, offset }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Unsigned(u64),
    Float(f64),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Unsigned(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::List(_) => None,
        }
    }
}

/// Decoded instrument fields in table order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet(Vec<(&'static str, FieldValue)>);

impl FieldSet {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }
}

impl Serialize for FieldSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Decodes the little-endian instrument fields of `data`. A field larger than
/// its scalar type is an array; fields past the end of `data` are left out.
pub fn decode_fields(instrument: Instrument, data: &[u8]) -> FieldSet {
    let mut set = Vec::new();
    for f in instrument.fields() {
        let Some(bytes) = data.get(f.offset..f.offset + f.size) else {
            continue;
        };
        let width = f.data_type.width();
        let value = if f.size > width {
            FieldValue::List(bytes.chunks_exact(width).map(|c| f.data_type.read(c)).collect())
        } else {
            f.data_type.read(bytes)
        };
        set.push((f.name, value));
    }
    FieldSet(set)
}

use DataType::*;

static XRAY_FIELDS: &[Field] = &[
    field("irradiance_xrsa1", F32, 4, 0),
    field("irradiance_xrsa2", F32, 4, 4),
    field("primary_xrsa", U8, 1, 8),
    field("irradiance_xrsb1", F32, 4, 9),
    field("irradiance_xrsb2", F32, 4, 13),
    field("primary_xrsb", U8, 1, 17),
    field("xrs_ratio", F32, 4, 18),
    field("corrected_current_xrsa_1", F32, 4, 22),
    field("corrected_current_xrsa_2", F32, 4, 26),
    field("corrected_current_xrsa_3", F32, 4, 30),
    field("corrected_current_xrsa_4", F32, 4, 34),
    field("corrected_current_xrsb_1", F32, 4, 38),
    field("corrected_current_xrsb_2", F32, 4, 42),
    field("corrected_current_xrsb_3", F32, 4, 46),
    field("corrected_current_xrsb_4", F32, 4, 50),
    field("dispersion_angle", F32, 4, 54),
    field("crossdispersion_angle", F32, 4, 58),
    field("sc_power_side", U8, 1, 62),
    field("exis_flight_model", U8, 1, 63),
    field("exis_configuration_id", U16, 2, 64),
    field("xrs_runctrlmd", U8, 1, 66),
    field("integration_time", F32, 4, 67),
    field("exs_sl_pwr_ena", U8, 1, 71),
    field("asic1_temperature", F32, 4, 72),
    field("asic2_temperature", F32, 4, 76),
    field("invalid_flags", U8, 1, 80),
    field("xrs_det_chg", U32, 4, 81),
    field("xrs_mode", U8, 1, 85),
    field("sps_obs_time_control_fields", U64, 8, 86),
    field("sps_obs_time", F64, 32, 94),
    field("sps_int_time", U64, 8, 126),
    field("sps_int_time_values", F32, 16, 134),
    field("sps_temperature", U64, 8, 150),
    field("sps_temperature_values", F32, 16, 158),
    field("sps_det_chg", U64, 8, 174),
    field("sps_det_chg_values", U32, 16, 182),
    field("num_angle_pairs", U16, 2, 198),
    field("yaw_flip_flag", U8, 1, 200),
    field("au_factor", F32, 4, 201),
    field("quality_flags", U32, 4, 205),
    field("time", F64, 8, 209),
    field("packet_count", U32, 4, 217),
    field("fov_unknown", U8, 1, 221),
    field("fov_eclipse", U8, 1, 222),
    field("fov_lunar_transit", U8, 1, 223),
    field("fov_planet_transit", U8, 1, 224),
    field("fov_off_point", U8, 1, 225),
    field("quaternion_q0", F32, 4, 226),
    field("quaternion_q1", F32, 4, 230),
    field("quaternion_q2", F32, 4, 234),
    field("quaternion_q3", F32, 4, 238),
    field("ecef_x", F32, 4, 242),
    field("ecef_y", F32, 4, 246),
    field("ecef_z", F32, 4, 250),
    field("solar_array_current_control_fields", U64, 8, 254),
    field("solar_array_current", U16, 8, 262),
    field("sc_eclipse_flag", U8, 1, 270),
];

static PROTON_LOW_FIELDS: &[Field] = &[
    field("diff_electron_fluxes_control", U64, 16, 0),
    field("diff_electron_fluxes", F32, 840, 16),
    field("diff_electron_flux_dqfs_control", U64, 16, 856),
    field("diff_electron_flux_dqfs", U8, 210, 872),
    field("diff_ion_fluxes_control", U64, 16, 1082),
    field("diff_ion_fluxes", F32, 840, 1098),
    field("diff_ion_flux_dqfs_control", U64, 16, 1938),
    field("diff_ion_flux_dqfs", U8, 210, 1954),
    field("diff_electron_uncertainties_control", U64, 16, 2164),
    field("diff_electron_uncertainties", F32, 840, 2180),
    field("diff_ion_uncertainties_control", U64, 16, 3020),
    field("diff_ion_uncertainties", F32, 840, 3036),
    field("l1a_eng_data_flag", U8, 1, 3876),
    field("l1a_ion_data_flag", U8, 1, 3877),
    field("l1a_ele_data_flag", U8, 1, 3878),
    field("l1b_processing_flag", U8, 1, 3879),
    field("n_blocks", U8, 1, 3880),
    field("instrument_mode", U8, 1, 3881),
    field("instrument_serial_number", U8, 1, 3882),
    field("l1a_sci_data_timestamp", F64, 8, 3883),
    field("quaternion_q0", F32, 4, 3891),
    field("quaternion_q1", F32, 4, 3895),
    field("quaternion_q2", F32, 4, 3899),
    field("quaternion_q3", F32, 4, 3903),
    field("ecef_x", F32, 4, 3907),
    field("ecef_y", F32, 4, 3911),
    field("ecef_z", F32, 4, 3915),
    field("yaw_flip_flag", U8, 1, 3919),
    field("eclipse_flag", U8, 1, 3920),
    field("solar_array_current_1", U16, 8, 3921),
    field("solar_array_current_2", U16, 8, 3929),
];

static PROTON_MED_HI_FIELDS: &[Field] = &[
    field("diff_electron_fluxes_control", U64, 16, 0),
    field("diff_electron_fluxes", F32, 200, 16),
    field("intg_electron_fluxes_control", U64, 8, 216),
    field("intg_electron_fluxes", F32, 20, 224),
    field("diff_proton_fluxes_control", U64, 16, 244),
    field("diff_proton_fluxes", F32, 220, 260),
    field("diff_electron_uncertainties_control", U64, 16, 480),
    field("diff_electron_uncertainties", F32, 200, 496),
    field("intg_electron_uncertainties_control", U64, 8, 696),
    field("intg_electron_uncertainties", F32, 20, 704),
    field("diff_proton_uncertainties_control", U64, 16, 724),
    field("diff_proton_uncertainties", F32, 220, 740),
    field("diff_electron_flux_dqfs_control", U64, 16, 960),
    field("diff_electron_flux_dqfs", U8, 50, 976),
    field("diff_proton_flux_dqfs_control", U64, 16, 1026),
    field("diff_proton_flux_dqfs", U8, 55, 1042),
    field("intg_electron_flux_dqfs_control", U64, 8, 1097),
    field("intg_electron_flux_dqfs", U8, 5, 1105),
    field("dos1_hi_let_dose", F32, 4, 1110),
    field("dos1_hi_let_dqf", U8, 1, 1114),
    field("dos2_hi_let_dose", F32, 4, 1115),
    field("dos2_hi_let_dqf", U8, 1, 1119),
    field("dos1_lo_let_dose", F32, 4, 1120),
    field("dos1_lo_let_dqf", U8, 1, 1124),
    field("dos2_lo_let_dose", F32, 4, 1125),
    field("dos2_lo_let_dqf", U8, 1, 1129),
    field("l1a_eng_data_flag", U8, 1, 1130),
    field("l1a_proton_data_flag", U8, 1, 1131),
    field("l1a_ele_data_flag", U8, 1, 1132),
    field("l1a_dos_data_flag", U8, 1, 1133),
    field("l1b_processing_flag", U8, 1, 1134),
    field("n_blocks", U8, 1, 1135),
    field("instrument_mode", U8, 1, 1136),
    field("instrument_serial_number", U8, 1, 1137),
    field("l1a_sci_data_timestamp", F64, 8, 1138),
    field("quaternion_q0", F32, 4, 1146),
    field("quaternion_q1", F32, 4, 1150),
    field("quaternion_q2", F32, 4, 1154),
    field("quaternion_q3", F32, 4, 1158),
    field("ecef_x", F32, 4, 1162),
    field("ecef_y", F32, 4, 1166),
    field("ecef_z", F32, 4, 1170),
    field("yaw_flip_flag", U8, 1, 1174),
    field("eclipse_flag", U8, 1, 1175),
    field("solar_array_current_control", U64, 8, 1176),
    field("solar_array_current", U16, 8, 1184),
];
