//! Shared memory of a request-response service.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ SegmentHeader                                                    │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ client[i]: PortSlot │ request loans │ response borrows │         │
//! │            channel[0..max_active]: ChannelHeader │ response queue │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ server[i]: PortSlot │ terminated clients │ response loans │      │
//! │            request borrows │ requests │                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ request pool                                                     │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ response pool                                                    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A channel carries the responses of one in-flight request. It stays in use
//! while the client still waits for responses or while any server still holds
//! the request. The request slot's `route` word names the channel as
//! `client_slot << 32 | channel`.
//!
//! Whoever reclaims a dead client counts it in every active server slot; each
//! server consumes its own count, so the loss reaches every server once.

use super::StaticConfig;
use crate::service::segment::PATTERN_OFFSET;
use crate::shm::layout::{LayoutBuilder, Region};
use crate::shm::pool::{PoolLayout, SlotPool};
use crate::shm::port_slot::PortSlot;
use crate::shm::queue::{IndexQueue, bytes_for_queue};
use crate::shm::slot_list::{SlotList, bytes_for_slot_list};
use std::mem::size_of;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[repr(C)]
pub(crate) struct ChannelHeader {
    /// 1 while the client's pending response is alive.
    pub(crate) client_active: AtomicU32,
    /// Number of server queue entries and active requests for this channel.
    pub(crate) server_refs: AtomicU32,
    pub(crate) request_id: AtomicU64,
    /// Request slot the pending response keeps referenced.
    pub(crate) request_slot: AtomicU64,
}

impl ChannelHeader {
    /// Reserves the channel for a new request.
    pub(crate) fn try_open(&self) -> bool {
        if self.server_refs.load(Ordering::Acquire) != 0 {
            return false;
        }
        if self
            .client_active
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }
        if self.server_refs.load(Ordering::Acquire) != 0 {
            self.client_active.store(0, Ordering::Release);
            return false;
        }
        true
    }

    pub(crate) fn is_open(&self) -> bool {
        self.client_active.load(Ordering::Acquire) == 1
    }
}

pub(crate) fn route(client_slot: usize, channel: usize) -> u64 {
    ((client_slot as u64) << 32) | channel as u64
}

pub(crate) fn split_route(route: u64) -> (usize, usize) {
    ((route >> 32) as usize, (route & 0xffff_ffff) as usize)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequestResponseLayout {
    clients: Region,
    client_loans: usize,
    client_borrows: usize,
    client_channels: Region,
    channel_queue: usize,
    servers: Region,
    server_terminations: usize,
    server_loans: usize,
    server_borrows: usize,
    server_requests: usize,
    request_loan_capacity: usize,
    response_borrow_capacity: usize,
    response_buffer_size: usize,
    response_loan_capacity: usize,
    request_capacity: usize,
    request_pool_offset: usize,
    request_pool: PoolLayout,
    response_pool_offset: usize,
    response_pool: PoolLayout,
    size: usize,
}

impl RequestResponseLayout {
    /// `None` when the limits describe a segment larger than the address space.
    pub(crate) fn new(config: &StaticConfig) -> Option<Self> {
        let max_active = config.max_active_requests_per_client();
        let borrows_per_pending = config.max_borrowed_responses_per_pending_response();
        let request_loan_capacity = config.max_loaned_requests();
        let response_borrow_capacity = max_active.checked_mul(borrows_per_pending)?;
        let response_buffer_size = config.max_response_buffer_size();
        let response_loan_capacity = config.server_max_loaned_responses();
        let request_capacity = config.max_clients().checked_mul(max_active)?;

        let mut channel = LayoutBuilder::new();
        channel.field(size_of::<ChannelHeader>(), 8)?;
        let channel_queue = channel.field(bytes_for_queue(response_buffer_size)?, 8)?;

        let mut client = LayoutBuilder::new();
        client.field(size_of::<PortSlot>(), 8)?;
        let client_loans = client.field(bytes_for_slot_list(request_loan_capacity)?, 8)?;
        let client_borrows = client.field(bytes_for_slot_list(response_borrow_capacity)?, 8)?;
        let client_channels = client.array(channel.size()?, max_active, 8)?;

        let mut server = LayoutBuilder::new();
        server.field(size_of::<PortSlot>(), 8)?;
        let server_terminations = server.field(size_of::<AtomicU64>(), 8)?;
        let server_loans = server.field(bytes_for_slot_list(response_loan_capacity)?, 8)?;
        let server_borrows = server.field(bytes_for_slot_list(request_capacity)?, 8)?;
        let server_requests = server.field(bytes_for_queue(request_capacity)?, 8)?;

        let request_slots = config
            .max_clients()
            .checked_mul(request_loan_capacity.checked_add(max_active)?)?;
        let request_pool = PoolLayout::new(
            request_slots,
            config.request_type().size(),
            config.request_type().alignment(),
        )?;
        let response_slots = config
            .max_servers()
            .checked_mul(response_loan_capacity)?
            .checked_add(
                request_capacity
                    .checked_mul(response_buffer_size.checked_add(borrows_per_pending)?)?,
            )?;
        let response_pool = PoolLayout::new(
            response_slots,
            config.response_type().size(),
            config.response_type().alignment(),
        )?;

        let mut segment = LayoutBuilder::starting_at(PATTERN_OFFSET);
        let clients = segment.array(client.size()?, config.max_clients(), 8)?;
        let servers = segment.array(server.size()?, config.max_servers(), 8)?;
        let request_pool_offset =
            segment.field(request_pool.bytes(), request_pool.required_alignment())?;
        let response_pool_offset =
            segment.field(response_pool.bytes(), response_pool.required_alignment())?;

        Some(Self {
            clients,
            client_loans,
            client_borrows,
            client_channels,
            channel_queue,
            servers,
            server_terminations,
            server_loans,
            server_borrows,
            server_requests,
            request_loan_capacity,
            response_borrow_capacity,
            response_buffer_size,
            response_loan_capacity,
            request_capacity,
            request_pool_offset,
            request_pool,
            response_pool_offset,
            response_pool,
            size: segment.size()?,
        })
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn max_clients(&self) -> usize {
        self.clients.count
    }

    pub(crate) fn max_servers(&self) -> usize {
        self.servers.count
    }

    pub(crate) fn max_active_requests(&self) -> usize {
        self.client_channels.count
    }

    /// # Safety
    /// `base` must map `self.size()` zeroed bytes nobody else uses yet.
    pub(crate) unsafe fn init(&self, base: *mut u8) {
        unsafe {
            for i in 0..self.clients.count {
                let slot = base.add(self.clients.at(i));
                SlotList::init(slot.add(self.client_loans), self.request_loan_capacity);
                SlotList::init(slot.add(self.client_borrows), self.response_borrow_capacity);
                for c in 0..self.client_channels.count {
                    let channel = slot.add(self.client_channels.at(c));
                    IndexQueue::init(channel.add(self.channel_queue), self.response_buffer_size);
                }
            }
            for i in 0..self.servers.count {
                let slot = base.add(self.servers.at(i));
                SlotList::init(slot.add(self.server_loans), self.response_loan_capacity);
                SlotList::init(slot.add(self.server_borrows), self.request_capacity);
                IndexQueue::init(slot.add(self.server_requests), self.request_capacity);
            }
            SlotPool::init(base.add(self.request_pool_offset), &self.request_pool);
            SlotPool::init(base.add(self.response_pool_offset), &self.response_pool);
        }
    }
}

pub(crate) struct Channel<'a> {
    pub(crate) header: &'a ChannelHeader,
    pub(crate) responses: IndexQueue<'a>,
}

pub(crate) struct ClientSlot<'a> {
    pub(crate) port: &'a PortSlot,
    /// Requests loaned but not yet sent.
    pub(crate) loans: SlotList<'a>,
    /// Responses handed to the application.
    pub(crate) borrows: SlotList<'a>,
    slot: *mut u8,
    layout: &'a RequestResponseLayout,
}

impl<'a> ClientSlot<'a> {
    pub(crate) fn channel(&self, index: usize) -> Channel<'a> {
        // SAFETY: inside channel `index` of this client slot.
        unsafe {
            let channel = self.slot.add(self.layout.client_channels.at(index));
            Channel {
                header: &*(channel as *const ChannelHeader),
                responses: IndexQueue::from_ptr(channel.add(self.layout.channel_queue)),
            }
        }
    }
}

pub(crate) struct ServerSlot<'a> {
    pub(crate) port: &'a PortSlot,
    /// Clients reclaimed after their node died, not yet reported.
    pub(crate) terminated_clients: &'a AtomicU64,
    /// Responses loaned but not yet sent.
    pub(crate) loans: SlotList<'a>,
    /// Requests handed to the application.
    pub(crate) borrows: SlotList<'a>,
    pub(crate) requests: IndexQueue<'a>,
}

/// View of a mapped request-response segment.
pub(crate) struct RequestResponseSegment<'a> {
    base: *mut u8,
    layout: &'a RequestResponseLayout,
}

impl<'a> RequestResponseSegment<'a> {
    /// # Safety
    /// `base` must be the start of a mapping initialized by
    /// [`RequestResponseLayout::init`] with this layout that outlives `'a`.
    pub(crate) unsafe fn new(base: *mut u8, layout: &'a RequestResponseLayout) -> Self {
        Self { base, layout }
    }

    pub(crate) fn client(&self, index: usize) -> ClientSlot<'a> {
        // SAFETY: inside client `index` of an initialized segment.
        unsafe {
            let slot = self.base.add(self.layout.clients.at(index));
            ClientSlot {
                port: &*(slot as *const PortSlot),
                loans: SlotList::from_ptr(slot.add(self.layout.client_loans)),
                borrows: SlotList::from_ptr(slot.add(self.layout.client_borrows)),
                slot,
                layout: self.layout,
            }
        }
    }

    pub(crate) fn server(&self, index: usize) -> ServerSlot<'a> {
        // SAFETY: inside server `index` of an initialized segment.
        unsafe {
            let slot = self.base.add(self.layout.servers.at(index));
            ServerSlot {
                port: &*(slot as *const PortSlot),
                terminated_clients: &*(slot.add(self.layout.server_terminations)
                    as *const AtomicU64),
                loans: SlotList::from_ptr(slot.add(self.layout.server_loans)),
                borrows: SlotList::from_ptr(slot.add(self.layout.server_borrows)),
                requests: IndexQueue::from_ptr(slot.add(self.layout.server_requests)),
            }
        }
    }

    pub(crate) fn request_pool(&self) -> SlotPool<'a> {
        // SAFETY: the request pool region of an initialized segment.
        unsafe { SlotPool::from_ptr(self.base.add(self.layout.request_pool_offset)) }
    }

    pub(crate) fn response_pool(&self) -> SlotPool<'a> {
        // SAFETY: the response pool region of an initialized segment.
        unsafe { SlotPool::from_ptr(self.base.add(self.layout.response_pool_offset)) }
    }

    /// Channel a request slot is routed to, if the route is in range.
    pub(crate) fn channel_of_request(&self, request: u32) -> Option<Channel<'a>> {
        let route = self.request_pool().header(request).route.load(Ordering::Acquire);
        let (client, channel) = split_route(route);
        if client < self.layout.max_clients() && channel < self.layout.max_active_requests() {
            Some(self.client(client).channel(channel))
        } else {
            None
        }
    }

    /// Drops one server-side hold on `request`: its channel reference and its
    /// pool reference.
    pub(crate) fn release_server_hold(&self, request: u32) {
        if let Some(channel) = self.channel_of_request(request) {
            channel.header.server_refs.fetch_sub(1, Ordering::AcqRel);
        }
        self.request_pool().release(request);
    }

    /// Closes the channel from the client side and frees its responses.
    pub(crate) fn close_channel(&self, channel: &Channel<'_>) {
        if channel.header.client_active.swap(0, Ordering::AcqRel) == 1 {
            let request = channel.header.request_slot.load(Ordering::Acquire) as u32;
            self.request_pool().release(request);
        }
        self.drain_responses(channel);
    }

    pub(crate) fn drain_responses(&self, channel: &Channel<'_>) {
        let pool = self.response_pool();
        channel.responses.drain(|index| {
            pool.release(index as u32);
        });
    }

    pub(crate) fn number_of_clients(&self) -> usize {
        (0..self.layout.max_clients())
            .filter(|&i| self.client(i).port.active_port().is_some())
            .count()
    }

    pub(crate) fn number_of_servers(&self) -> usize {
        (0..self.layout.max_servers())
            .filter(|&i| self.server(i).port.active_port().is_some())
            .count()
    }

    /// Hands back everything a client slot holds.
    pub(crate) fn release_client(&self, client: &ClientSlot<'_>) {
        for c in 0..self.layout.max_active_requests() {
            self.close_channel(&client.channel(c));
        }
        let responses = self.response_pool();
        client.borrows.drain(|index| {
            responses.release(index);
        });
        let requests = self.request_pool();
        client.loans.drain(|index| {
            requests.release(index);
        });
    }

    /// Hands back everything a server slot holds.
    pub(crate) fn release_server(&self, server: &ServerSlot<'_>) {
        server.requests.drain(|index| self.release_server_hold(index as u32));
        server.borrows.drain(|index| self.release_server_hold(index));
        let responses = self.response_pool();
        server.loans.drain(|index| {
            responses.release(index);
        });
        server.terminated_clients.store(0, Ordering::Release);
    }

    /// Records a terminated client in every active server.
    fn report_terminated_client(&self) {
        for i in 0..self.layout.max_servers() {
            let server = self.server(i);
            if server.port.active_port().is_some() {
                server.terminated_clients.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    /// Reclaims the client slots whose owner `is_dead`; returns how many.
    pub(crate) fn reclaim_clients(&self, is_dead: &mut impl FnMut(u64) -> bool) -> usize {
        let mut reclaimed = 0;
        for i in 0..self.layout.max_clients() {
            let client = self.client(i);
            if client.port.try_begin_reclaim_if(&mut *is_dead) {
                self.release_client(&client);
                client.port.vacate();
                self.report_terminated_client();
                reclaimed += 1;
            }
        }
        reclaimed
    }

    /// Reclaims the server slots whose owner `is_dead`; returns how many.
    pub(crate) fn reclaim_servers(&self, is_dead: &mut impl FnMut(u64) -> bool) -> usize {
        let mut reclaimed = 0;
        for i in 0..self.layout.max_servers() {
            let server = self.server(i);
            if server.port.try_begin_reclaim_if(&mut *is_dead) {
                self.release_server(&server);
                server.port.vacate();
                reclaimed += 1;
            }
        }
        reclaimed
    }

    pub(crate) fn reclaim(&self, mut is_dead: impl FnMut(u64) -> bool) -> usize {
        self.reclaim_clients(&mut is_dead) + self.reclaim_servers(&mut is_dead)
    }
}
