// Cantata
// Copyright (c) 2022-2025 The Project Cantata Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;

use cantata_core::codecs::CodecParameters;
use cantata_core::errors::{decode_error, Result};
use cantata_core::formats::{util, Packet};

use super::common::SideData;
use super::mappings::{MapResult, Mapper, PacketParser};
use super::page::Page;

use log::{debug, warn};

#[derive(Copy, Clone, Debug)]
struct Bound {
    ts: u64,
    delay: u64,
}

#[derive(Copy, Clone)]
struct PageInfo {
    seq: u32,
}

#[derive(Default)]
pub struct InspectState {
    bound: Option<Bound>,
    parser: Option<Box<dyn PacketParser>>,
}

pub struct LogicalStream {
    mapper: Box<dyn Mapper>,
    packets: VecDeque<Packet>,
    part_buf: Vec<u8>,
    part_len: usize,
    prev_page_info: Option<PageInfo>,
    start_bound: Option<Bound>,
    end_bound: Option<Bound>,
    gapless: bool,
}

impl LogicalStream {
    /// The maximum size of a partially assembled packet.
    const MAX_PACKET_LEN: usize = 8 * 1024 * 1024;

    pub fn new(mapper: Box<dyn Mapper>, gapless: bool) -> Self {
        LogicalStream {
            mapper,
            packets: Default::default(),
            part_buf: Default::default(),
            part_len: 0,
            prev_page_info: None,
            start_bound: None,
            end_bound: None,
            gapless,
        }
    }

    /// Reset the logical stream after a page discontinuity.
    pub fn reset(&mut self) {
        self.part_len = 0;
        self.prev_page_info = None;
        self.packets.clear();
        self.mapper.reset();
    }

    /// Returns true if the stream is ready.
    pub fn is_ready(&self) -> bool {
        self.mapper.is_ready()
    }

    /// Get the `CodecParameters` for the logical stream.
    pub fn codec_params(&self) -> &CodecParameters {
        self.mapper.codec_params()
    }

    /// Reads a page.
    pub fn read_page(&mut self, page: &Page<'_>) -> Result<Vec<SideData>> {
        // Side data vector. This will not allocate unless data is pushed to it (normal case).
        let mut side_data = Vec::new();

        // If the last sequence number is available, detect non-monotonicity and discontinuities
        // in the stream. In these cases, clear any partial packet data.
        if let Some(last) = &self.prev_page_info {
            if page.header.sequence < last.seq {
                warn!("detected stream page non-monotonicity");
                self.part_len = 0;
            }
            else if page.header.sequence - last.seq > 1 {
                warn!(
                    "detected stream discontinuity of {} page(s)",
                    page.header.sequence - last.seq
                );
                self.part_len = 0;
            }
        }

        self.prev_page_info = Some(PageInfo { seq: page.header.sequence });

        let mut iter = page.packets();

        // If there is partial packet data buffered, a continuation page is expected.
        if !page.header.is_continuation && self.part_len > 0 {
            warn!("expected a continuation page");

            // Clear partial packet data.
            self.part_len = 0;
        }

        // If there is no partial packet data buffered, a continuation page is not expected.
        if page.header.is_continuation && self.part_len == 0 {
            // If the continuation page contains packets, drop the first packet since it would
            // require partial packet data to be complete. Otherwise, ignore this page entirely.
            if page.num_packets() > 0 {
                warn!("unexpected continuation page, ignoring incomplete first packet");
                iter.next();
            }
            else {
                warn!("unexpected continuation page, ignoring page");
                return Ok(side_data);
            }
        }

        let num_prev_packets = self.packets.len();

        for buf in &mut iter {
            // Get a packet with data from the partial packet buffer, the page, or both.
            let data = self.get_packet(buf);

            // Perform packet mapping. If the packet contains stream data, queue it onto the
            // packet queue. If it contains side data, then add it to the side data list. Ignore
            // other types of packet data.
            match self.mapper.map_packet(&data) {
                Ok(MapResult::StreamData { dur }) => {
                    self.packets.push_back(Packet::new_from_boxed_slice(
                        page.header.serial,
                        0,
                        dur,
                        data,
                    ));
                }
                Ok(MapResult::SideData { data }) => side_data.push(data),
                Err(e) => {
                    warn!("mapping packet failed ({}), skipping", e);
                }
                _ => (),
            }
        }

        // If the page contains partial packet data, then save the partial packet data for later
        // as the packet will be completed on a later page.
        if let Some(buf) = iter.partial_packet() {
            self.save_partial_packet(buf)?;
        }

        // The number of packets from this page that were queued.
        let num_new_packets = self.packets.len() - num_prev_packets;

        if num_new_packets > 0 {
            // Get the start delay.
            let start_delay = self.start_bound.as_ref().map_or(0, |b| b.delay);

            // Assign timestamps by first calculating the timestamp of one past the last sample in
            // the last packet of this page, and adding the start delay.
            let mut page_end_ts =
                self.mapper.absgp_to_ts(page.header.absgp).saturating_add(start_delay);

            // If this is the last page, then add the end delay to the timestamp.
            if page.header.is_last_page {
                let end_delay = self.end_bound.as_ref().map_or(0, |b| b.delay);
                page_end_ts = page_end_ts.saturating_add(end_delay);
            }

            // Then, iterate over the newly added packets in reverse order and subtract their
            // cumulative duration at each iteration to get the timestamp of the first sample
            // in each packet.
            let mut page_dur = 0u64;

            for packet in self.packets.iter_mut().rev().take(num_new_packets) {
                page_dur = page_dur.saturating_add(packet.dur);
                packet.ts = page_end_ts.saturating_sub(page_dur);
            }

            if self.gapless {
                for packet in self.packets.iter_mut().rev().take(num_new_packets) {
                    util::trim_packet(
                        packet,
                        start_delay as u32,
                        self.end_bound.as_ref().map(|b| b.ts),
                    );
                }
            }
        }

        Ok(side_data)
    }

    /// Returns true if the logical stream has packets buffered.
    pub fn has_packets(&self) -> bool {
        !self.packets.is_empty()
    }

    /// Examine, but do not consume, the next packet.
    pub fn peek_packet(&self) -> Option<&Packet> {
        self.packets.front()
    }

    /// Consumes and returns the next packet.
    pub fn next_packet(&mut self) -> Option<Packet> {
        self.packets.pop_front()
    }

    /// Consumes the next packet.
    pub fn consume_packet(&mut self) {
        self.packets.pop_front();
    }

    /// Examine the first page of the non-setup codec bitstream to obtain the start time and start
    /// delay parameters.
    pub fn inspect_start_page(&mut self, page: &Page<'_>) {
        if self.start_bound.is_some() {
            debug!("start page already found");
            return;
        }

        let mut parser = match self.mapper.make_parser() {
            Some(parser) => parser,
            _ => {
                debug!("failed to make start bound packet parser");
                return;
            }
        };

        // Calculate the page duration.
        let mut page_dur = 0u64;

        for buf in page.packets() {
            page_dur = page_dur.saturating_add(parser.parse_next_packet_dur(buf));
        }

        let page_end_ts = self.mapper.absgp_to_ts(page.header.absgp);

        // If the page timestamp is >= the page duration, then the stream starts at timestamp 0
        // or a positive start time.
        let bound = if page_end_ts >= page_dur {
            Bound { ts: page_end_ts - page_dur, delay: 0 }
        }
        else {
            // If the page timestamp < the page duration, then the difference is the start delay.
            Bound { ts: 0, delay: page_dur - page_end_ts }
        };

        // Update codec parameters.
        let codec_params = self.mapper.codec_params_mut();

        codec_params.with_start_ts(bound.ts);

        if bound.delay > 0 {
            codec_params.with_delay(bound.delay as u32);
        }

        // Update the start bound.
        self.start_bound = Some(bound);
    }

    /// Examines one or more of the last pages of the codec bitstream to obtain the end time and
    /// end delay parameters. To obtain the end delay, at a minimum, the last two pages are
    /// required. The state returned by each iteration of this function should be passed into the
    /// subsequent iteration.
    pub fn inspect_end_page(&mut self, mut state: InspectState, page: &Page<'_>) -> InspectState {
        if self.end_bound.is_some() {
            debug!("end page already found");
            return state;
        }

        // Get and/or create the packet parser state.
        let parser = match &mut state.parser {
            Some(parser) => parser,
            None => {
                state.parser = self.mapper.make_parser();

                if let Some(parser) = &mut state.parser {
                    parser
                }
                else {
                    debug!("failed to make end bound packet parser");
                    return state;
                }
            }
        };

        let start_delay = self.start_bound.as_ref().map_or(0, |b| b.delay);

        // The actual page end timestamp is the absolute granule position + the start delay.
        let page_end_ts = self
            .mapper
            .absgp_to_ts(page.header.absgp)
            .saturating_add(if self.gapless { 0 } else { start_delay });

        // Calculate the page duration. Note that even though only the last page uses this
        // duration, it is important to feed the packet parser so that the first packet of the
        // final page doesn't have a duration of 0 due to lapping on some codecs.
        let mut page_dur = 0u64;

        for buf in page.packets() {
            page_dur = page_dur.saturating_add(parser.parse_next_packet_dur(buf));
        }

        // The end delay can only be determined if this is the last page, and the timestamp of the
        // second last page is known.
        let end_delay = if page.header.is_last_page {
            if let Some(last_bound) = &state.bound {
                // The real ending timestamp of the decoded data is the timestamp of the previous
                // page plus the decoded duration of this page.
                let actual_page_end_ts = last_bound.ts.saturating_add(page_dur);

                // Any samples after the stated timestamp of this page are considered delay
                // samples.
                actual_page_end_ts.saturating_sub(page_end_ts)
            }
            else {
                // Don't have the timestamp of the previous page so it is not possible to
                // calculate the end delay.
                0
            }
        }
        else {
            // Only the last page can have an end delay.
            0
        };

        let bound = Bound { ts: page_end_ts, delay: end_delay };

        // If this is the last page, update the codec parameters.
        if page.header.is_last_page {
            let codec_params = self.mapper.codec_params_mut();

            // Do not report the end delay if gapless is enabled.
            let block_end_ts = bound.ts + if self.gapless { 0 } else { bound.delay };

            if block_end_ts > codec_params.start_ts {
                codec_params.with_n_frames(block_end_ts - codec_params.start_ts);
            }

            if bound.delay > 0 {
                codec_params.with_padding(bound.delay as u32);
            }

            self.end_bound = Some(bound)
        }

        // Update the state's bound.
        state.bound = Some(bound);

        state
    }

    /// Examine a page and return the start and end timestamps as a tuple.
    pub fn inspect_page(&mut self, page: &Page<'_>) -> (u64, u64) {
        // Get the start delay.
        let start_delay = self.start_bound.as_ref().map_or(0, |b| b.delay);

        // Get the cumulative duration of all packets within this page.
        let mut page_dur = 0u64;

        if let Some(mut parser) = self.mapper.make_parser() {
            for buf in page.packets() {
                page_dur = page_dur.saturating_add(parser.parse_next_packet_dur(buf));
            }
        }

        // If this is the final page, get the end delay.
        let end_delay = if page.header.is_last_page {
            self.end_bound.as_ref().map_or(0, |b| b.delay)
        }
        else {
            0
        };

        // The total delay.
        let delay = start_delay + end_delay;

        // Add the total delay to the page end timestamp.
        let page_end_ts = self.mapper.absgp_to_ts(page.header.absgp).saturating_add(delay);

        // Get the page start timestamp of the page by subtracting the cumulative packet duration.
        let page_start_ts = page_end_ts.saturating_sub(page_dur);

        if !self.gapless {
            // If gapless playback is disabled, then report the start and end timestamps with the
            // delays incorporated.
            (page_start_ts, page_end_ts)
        }
        else {
            // If gapless playback is enabled, report the start and end timestamps without the
            // delays.
            (page_start_ts.saturating_sub(delay), page_end_ts.saturating_sub(delay))
        }
    }

    fn get_packet(&mut self, packet_buf: &[u8]) -> Box<[u8]> {
        if self.part_len == 0 {
            Box::from(packet_buf)
        }
        else {
            let mut buf = vec![0u8; self.part_len + packet_buf.len()];

            // Split packet buffer into two portions: saved and new.
            let (vec0, vec1) = buf.split_at_mut(self.part_len);

            // Copy and consume the saved partial packet.
            vec0.copy_from_slice(&self.part_buf[..self.part_len]);
            self.part_len = 0;

            // Read the remainder of the partial packet from the page.
            vec1.copy_from_slice(packet_buf);

            buf.into_boxed_slice()
        }
    }

    fn save_partial_packet(&mut self, buf: &[u8]) -> Result<()> {
        let new_part_len = self.part_len + buf.len();

        if new_part_len > self.part_buf.len() {
            // Do not exceed a hard limit to prevent unbounded memory growth.
            if new_part_len > LogicalStream::MAX_PACKET_LEN {
                return decode_error("ogg: packet buffer would exceed max size");
            }

            // New partial packet buffer size, rounded up to the nearest 8K block.
            let new_buf_len = (new_part_len + (8 * 1024 - 1)) & !(8 * 1024 - 1);
            debug!("grow packet buffer to {} bytes", new_buf_len);

            self.part_buf.resize(new_buf_len, Default::default());
        }

        self.part_buf[self.part_len..new_part_len].copy_from_slice(buf);
        self.part_len = new_part_len;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cantata_core::codecs::CodecParameters;
    use cantata_core::errors::Result;

    use super::super::mappings::{MapResult, Mapper, PacketParser};
    use super::super::page::{Page, PageHeader};
    use super::LogicalStream;

    /// A test mapper that treats every packet as stream data with a fixed duration.
    struct FixedDurMapper {
        codec_params: CodecParameters,
        dur: u64,
    }

    impl FixedDurMapper {
        fn new(dur: u64) -> Box<Self> {
            Box::new(FixedDurMapper { codec_params: CodecParameters::new(), dur })
        }
    }

    impl Mapper for FixedDurMapper {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn codec_params(&self) -> &CodecParameters {
            &self.codec_params
        }

        fn codec_params_mut(&mut self) -> &mut CodecParameters {
            &mut self.codec_params
        }

        fn reset(&mut self) {}

        fn make_parser(&self) -> Option<Box<dyn PacketParser>> {
            None
        }

        fn map_packet(&mut self, _packet: &[u8]) -> Result<MapResult> {
            Ok(MapResult::StreamData { dur: self.dur })
        }
    }

    /// Helper to fabricate an in-memory page. The lacing values must be consistent with `body`.
    struct TestPage {
        header: PageHeader,
        packet_lens: Vec<u16>,
        body: Vec<u8>,
    }

    impl TestPage {
        fn new(sequence: u32, absgp: u64, is_continuation: bool, packets: &[&[u8]]) -> Self {
            let mut packet_lens = Vec::new();
            let mut body = Vec::new();

            for packet in packets {
                packet_lens.push(packet.len() as u16);
                body.extend_from_slice(packet);
            }

            let header = PageHeader {
                sequence,
                absgp,
                is_continuation,
                ..Default::default()
            };

            TestPage { header, packet_lens, body }
        }

        fn page(&self) -> Page<'_> {
            Page::new_for_test(self.header, &self.packet_lens, &self.body)
        }
    }

    #[test]
    fn verify_packet_timestamps() {
        let mut stream = LogicalStream::new(FixedDurMapper::new(128), false);

        // Three packets ending at absgp 384. Timestamps are assigned backwards from the page end
        // timestamp.
        let page = TestPage::new(0, 384, false, &[b"a", b"b", b"c"]);

        stream.read_page(&page.page()).unwrap();

        let p0 = stream.next_packet().unwrap();
        let p1 = stream.next_packet().unwrap();
        let p2 = stream.next_packet().unwrap();

        assert_eq!((p0.ts, p0.dur), (0, 128));
        assert_eq!((p1.ts, p1.dur), (128, 128));
        assert_eq!((p2.ts, p2.dur), (256, 128));

        assert!(stream.next_packet().is_none());
    }

    #[test]
    fn verify_discontinuity_drops_partial() {
        let mut stream = LogicalStream::new(FixedDurMapper::new(128), false);

        // Page 0 leaves partial packet data behind (no terminating lacing value).
        let page = TestPage {
            header: PageHeader { sequence: 0, absgp: 0, ..Default::default() },
            packet_lens: Vec::new(),
            body: vec![0u8; 255],
        };

        stream.read_page(&page.page()).unwrap();
        assert_eq!(stream.part_len, 255);

        // Page 3 creates a discontinuity. The partial data must be dropped, and the page's
        // packets must be complete on their own.
        let page = TestPage::new(3, 128, false, &[b"z"]);

        stream.read_page(&page.page()).unwrap();

        assert_eq!(stream.part_len, 0);

        let packet = stream.next_packet().unwrap();
        assert_eq!(packet.buf(), b"z");
    }

    #[test]
    fn verify_unexpected_continuation() {
        let mut stream = LogicalStream::new(FixedDurMapper::new(128), false);

        // A continuation page with no buffered partial data must drop its first packet.
        let page = TestPage::new(0, 256, true, &[b"tail", b"whole"]);

        stream.read_page(&page.page()).unwrap();

        let packet = stream.next_packet().unwrap();
        assert_eq!(packet.buf(), b"whole");
        assert!(stream.next_packet().is_none());
    }

    #[test]
    fn verify_partial_packet_reassembly() {
        let mut stream = LogicalStream::new(FixedDurMapper::new(128), false);

        // Page 0 ends with partial packet data.
        let page = TestPage {
            header: PageHeader { sequence: 0, absgp: 0, ..Default::default() },
            packet_lens: Vec::new(),
            body: b"hello, ".to_vec(),
        };

        stream.read_page(&page.page()).unwrap();

        // Page 1 completes the packet.
        let page = TestPage::new(1, 128, true, &[b"world"]);

        stream.read_page(&page.page()).unwrap();

        let packet = stream.next_packet().unwrap();
        assert_eq!(packet.buf(), b"hello, world");
    }
}
