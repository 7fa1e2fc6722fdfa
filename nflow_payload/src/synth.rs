//! Flow record synthesizer.
//!
//! Turns one configured flow into a single-record `NetFlow` v5 packet per
//! reporting cycle. Packet and byte counts are reported verbatim; ports and
//! protocol come from the flow's [`TrafficType`]; the addresses are a fixed
//! loopback triple. The only randomness is the destination prefix mask.

use std::{sync::Arc, time::Duration};

use rand::Rng;

use crate::{
    clock::{Clock, ExportClock, RealClock},
    netflow::{Header, Packet, Record, VERSION},
    traffic::TrafficType,
};

/// Source address of every synthesized record, 127.0.0.2
pub const SRC_ADDR: u32 = u32::from_be_bytes([127, 0, 0, 2]);
/// Destination address of every synthesized record, 127.0.0.1
pub const DST_ADDR: u32 = u32::from_be_bytes([127, 0, 0, 1]);
/// Next hop of every synthesized record, 127.0.0.3
pub const NEXT_HOP: u32 = u32::from_be_bytes([127, 0, 0, 3]);
/// Source port of every synthesized record
pub const SRC_PORT: u16 = 40;
/// Source AS number of every synthesized record
pub const SRC_AS: u16 = 0;
/// Destination AS number of every synthesized record
pub const DST_AS: u16 = 553;
/// Engine type written into every header
pub const ENGINE_TYPE: u8 = 1;
/// Engine id written into every header
pub const ENGINE_ID: u8 = 0;

/// A flow with its traffic type already resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowSpec {
    /// Packets reported per record
    pub packets: u32,
    /// Bytes reported per record
    pub octets: u32,
    /// Source of the record's destination port and protocol
    pub traffic_type: TrafficType,
    /// Sampling interval written into the header
    pub sample_interval: u16,
    /// Derive interface indices from the address ordering instead of zero
    pub false_index: bool,
}

/// Builds packets for one flow.
#[derive(Debug)]
pub struct Synthesizer<C = RealClock> {
    spec: FlowSpec,
    clock: Arc<ExportClock<C>>,
}

impl<C> Synthesizer<C>
where
    C: Clock,
{
    /// Create a new [`Synthesizer`] stamping headers from `clock`.
    pub fn new(spec: FlowSpec, clock: Arc<ExportClock<C>>) -> Self {
        Self { spec, clock }
    }

    /// The flow this synthesizer builds packets for.
    pub fn spec(&self) -> &FlowSpec {
        &self.spec
    }

    /// Build the next packet.
    ///
    /// Advances the shared flow sequence. The record ends at the current
    /// `sys_uptime` and starts `flow_duration` earlier; near process start that
    /// subtraction wraps and is reported as-is.
    #[allow(clippy::cast_possible_truncation)]
    pub fn synthesize<R>(&self, flow_duration: Duration, rng: &mut R) -> Packet
    where
        R: Rng + ?Sized,
    {
        let stamp = self.clock.stamp();
        let header = Header {
            version: VERSION,
            count: 1,
            sys_uptime: stamp.sys_uptime,
            unix_secs: stamp.unix_secs,
            unix_nsecs: stamp.unix_nsecs,
            flow_sequence: stamp.flow_sequence,
            engine_type: ENGINE_TYPE,
            engine_id: ENGINE_ID,
            sampling_interval: self.spec.sample_interval,
        };

        let (input, output) = interface_indices(self.spec.false_index, SRC_ADDR, DST_ADDR);
        let last = stamp.sys_uptime;
        let record = Record {
            src_addr: SRC_ADDR,
            dst_addr: DST_ADDR,
            next_hop: NEXT_HOP,
            input,
            output,
            packets: self.spec.packets,
            octets: self.spec.octets,
            first: last.wrapping_sub(flow_duration.as_millis() as u32),
            last,
            src_port: SRC_PORT,
            dst_port: self.spec.traffic_type.port(),
            pad1: 0,
            tcp_flags: 0,
            protocol: self.spec.traffic_type.protocol(),
            tos: 0,
            src_as: SRC_AS,
            dst_as: DST_AS,
            src_mask: 0,
            dst_mask: rng.random_range(0..32),
            pad2: 0,
        };

        Packet {
            header,
            records: vec![record],
        }
    }
}

/// SNMP (input, output) interface indices for a record.
#[must_use]
pub fn interface_indices(false_index: bool, src_addr: u32, dst_addr: u32) -> (u16, u16) {
    match (false_index, src_addr > dst_addr) {
        (false, _) => (0, 0),
        (true, true) => (1, 2),
        (true, false) => (2, 1),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        clock::test::ManualClock,
        netflow::decode,
        traffic::{IPPROTO_UDP, TrafficType},
    };
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};

    fn spec(traffic_type: TrafficType) -> FlowSpec {
        FlowSpec {
            packets: 10,
            octets: 1_000,
            traffic_type,
            sample_interval: 1,
            false_index: false,
        }
    }

    fn synthesizer(spec: FlowSpec, elapsed_ms: u64) -> Synthesizer<ManualClock> {
        let clock = Arc::new(ExportClock::with_clock(ManualClock::at(
            elapsed_ms,
            1_700_000_000_000_000_000,
        )));
        Synthesizer::new(spec, clock)
    }

    #[test]
    fn dns_flow_reports_configured_counts() {
        let spec = FlowSpec {
            packets: 5,
            octets: 500,
            ..spec("dns".parse().unwrap())
        };
        let synth = synthesizer(spec, 10_000);
        let mut rng = SmallRng::seed_from_u64(0);
        let packet = synth.synthesize(Duration::from_secs(1), &mut rng);

        let record = packet.records[0];
        assert_eq!(record.protocol, 17);
        assert_eq!(record.dst_port, 53);
        assert_eq!(record.packets, 5);
        assert_eq!(record.octets, 500);
    }

    #[test]
    fn empty_traffic_type_reports_ntp() {
        let synth = synthesizer(spec("".parse().unwrap()), 10_000);
        let mut rng = SmallRng::seed_from_u64(0);
        let record = synth.synthesize(Duration::from_secs(1), &mut rng).records[0];
        assert_eq!(record.dst_port, 123);
        assert_eq!(record.protocol, IPPROTO_UDP);
    }

    #[test]
    fn fixed_fields() {
        let synth = synthesizer(spec(TrafficType::Https), 10_000);
        let mut rng = SmallRng::seed_from_u64(7);
        let packet = synth.synthesize(Duration::from_millis(2_500), &mut rng);

        let header = packet.header;
        assert_eq!(header.version, 5);
        assert_eq!(header.count, 1);
        assert_eq!(header.flow_sequence, 1);
        assert_eq!(header.sys_uptime, 11_000);
        assert_eq!(header.unix_secs, 1_700_000_000);
        assert_eq!(header.unix_nsecs, 0);
        assert_eq!(header.engine_type, ENGINE_TYPE);
        assert_eq!(header.engine_id, ENGINE_ID);
        assert_eq!(header.sampling_interval, 1);

        let record = packet.records[0];
        assert_eq!(record.src_addr, SRC_ADDR);
        assert_eq!(record.dst_addr, DST_ADDR);
        assert_eq!(record.next_hop, NEXT_HOP);
        assert_eq!((record.input, record.output), (0, 0));
        assert_eq!(record.src_port, 40);
        assert_eq!(record.dst_port, 443);
        assert_eq!(record.protocol, 6);
        assert_eq!(record.tos, 0);
        assert_eq!((record.src_as, record.dst_as), (0, 553));
        assert_eq!(record.src_mask, 0);
        assert_eq!(record.last, 11_000);
        assert_eq!(record.first, 8_500);
    }

    #[test]
    fn sample_interval_is_taken_from_the_flow() {
        let synth = synthesizer(
            FlowSpec {
                sample_interval: 512,
                ..spec(TrafficType::Ntp)
            },
            0,
        );
        let mut rng = SmallRng::seed_from_u64(0);
        let packet = synth.synthesize(Duration::ZERO, &mut rng);
        assert_eq!(packet.header.sampling_interval, 512);
    }

    #[test]
    fn flow_longer_than_uptime_wraps_start() {
        // Uptime at start is the 1000ms offset; a 5s flow starts 4s "before" 0.
        let synth = synthesizer(spec(TrafficType::Ntp), 0);
        let mut rng = SmallRng::seed_from_u64(0);
        let record = synth.synthesize(Duration::from_secs(5), &mut rng).records[0];
        assert_eq!(record.last, 1_000);
        assert_eq!(record.first, u32::MAX - 3_999);
    }

    #[test]
    fn false_index_orders_by_address() {
        assert_eq!(interface_indices(false, 2, 1), (0, 0));
        assert_eq!(interface_indices(true, 2, 1), (1, 2));
        assert_eq!(interface_indices(true, 1, 2), (2, 1));
        assert_eq!(interface_indices(true, 1, 1), (2, 1));

        let synth = synthesizer(
            FlowSpec {
                false_index: true,
                ..spec(TrafficType::Ntp)
            },
            0,
        );
        let mut rng = SmallRng::seed_from_u64(0);
        let record = synth.synthesize(Duration::ZERO, &mut rng).records[0];
        // 127.0.0.2 > 127.0.0.1
        assert_eq!((record.input, record.output), (1, 2));
    }

    #[test]
    fn sequence_advances_per_packet() {
        let synth = synthesizer(spec(TrafficType::Ssh), 0);
        let mut rng = SmallRng::seed_from_u64(0);
        let sequences: Vec<u32> = (0..4)
            .map(|_| synth.synthesize(Duration::ZERO, &mut rng).header.flow_sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    proptest! {
        #[test]
        fn destination_mask_below_32(seed in any::<u64>()) {
            let synth = synthesizer(spec(TrafficType::Dns), 0);
            let mut rng = SmallRng::seed_from_u64(seed);
            let packet = synth.synthesize(Duration::ZERO, &mut rng);
            prop_assert!(packet.records[0].dst_mask < 32);
        }

        #[test]
        fn synthesized_packets_decode(
            seed in any::<u64>(),
            packets in any::<u32>(),
            octets in any::<u32>(),
            idx in 0..TrafficType::ALL.len()
        ) {
            let spec = FlowSpec {
                packets,
                octets,
                traffic_type: TrafficType::ALL[idx],
                sample_interval: 1,
                false_index: false,
            };
            let synth = synthesizer(spec, 60_000);
            let mut rng = SmallRng::seed_from_u64(seed);
            let packet = synth.synthesize(Duration::from_secs(1), &mut rng);
            let bytes = packet.to_bytes();
            prop_assert_eq!(bytes.len(), 72);
            prop_assert_eq!(decode(&bytes).unwrap(), packet);
        }
    }
}
