use bytes::Bytes;
use clap::{Arg, Command};
use log::LevelFilter;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};
use mio_extras::channel as mio_channel;
use mio_extras::timer::Timer;
use mio_v06::{Events, Poll, PollOpt, Ready, Token};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use umber_rtps::dds::qos::{
    policy::{Durability, History, HistoryQosKind, Reliability},
    ReaderQosBuilder, WriterQosBuilder,
};
use umber_rtps::message::submessage::element::SerializedPayload;
use umber_rtps::rtps::cache::{ChangeKind, InstanceHandle};
use umber_rtps::rtps::participant::{
    ParticipantAttributes, ReaderConfig, RtpsParticipant, WriterConfig,
};
use umber_rtps::rtps::reader::{DataReaderStatusChanged, ReaderAttributes, RtpsReader};
use umber_rtps::rtps::writer::{DataWriterStatusChanged, WriterAttributes};
use umber_rtps::structure::{RTPSEntity, TopicKind};

#[derive(Serialize, Deserialize, Clone, Debug)]
struct Shape {
    color: String,
    x: i32,
    y: i32,
    shapesize: i32,
}

const KEEP_ALL: History = History {
    kind: HistoryQosKind::KeepAll,
    depth: 1,
};

const WRITE_TIMER: Token = Token(0);
const WRITER_STATUS: Token = Token(1);
const READER_STATUS: Token = Token(2);

fn main() {
    let args = Command::new("reliable_pair")
        .about("a reliable Writer and Reader exchanging shapes over UDP")
        .arg(
            Arg::new("count")
                .short('c')
                .help("number of samples to write")
                .default_value("10"),
        )
        .arg(
            Arg::new("interval")
                .short('i')
                .help("milliseconds between writes")
                .default_value("200"),
        )
        .arg(
            Arg::new("domain")
                .short('d')
                .help("domain id")
                .default_value("0"),
        )
        .arg(
            Arg::new("reliability")
                .short('r')
                .help("reliable or best_effort")
                .default_value("reliable"),
        )
        .get_matches();
    let count: i32 = args
        .get_one::<String>("count")
        .and_then(|c| c.parse().ok())
        .unwrap_or(10);
    let interval: u64 = args
        .get_one::<String>("interval")
        .and_then(|i| i.parse().ok())
        .unwrap_or(200);
    let domain_id: u16 = args
        .get_one::<String>("domain")
        .and_then(|d| d.parse().ok())
        .unwrap_or(0);
    let reliability = match args.get_one::<String>("reliability").map(String::as_str) {
        Some("best_effort") => Reliability::default_besteffort(),
        _ => Reliability::default_reliable(),
    };

    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "[{l}] [{d(%s%.f)}] [{t}] [pid: {P}]: {m}{n}",
        )))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(LevelFilter::Info))
        .unwrap();
    log4rs::init_config(config).unwrap();

    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
    let mut small_rng = SmallRng::seed_from_u64(now.as_nanos() as u64);
    let attributes = ParticipantAttributes {
        domain_id,
        ..ParticipantAttributes::default()
    };
    let publisher = RtpsParticipant::new(attributes.clone(), None, &mut small_rng)
        .expect("couldn't create publisher participant");
    let subscriber = RtpsParticipant::new(attributes, None, &mut small_rng)
        .expect("couldn't create subscriber participant");

    let (writer_status_sender, writer_status) = mio_channel::channel();
    let writer = publisher.create_writer(
        WriterConfig {
            topic_kind: TopicKind::NoKey,
            qos: WriterQosBuilder::new()
                .reliability(reliability)
                .durability(Durability::TransientLocal)
                .history(KEEP_ALL)
                .build(),
            attributes: WriterAttributes::default(),
        },
        Some(writer_status_sender),
    );
    let (reader_status_sender, reader_status) = mio_channel::channel();
    let reader = subscriber.create_reader(
        ReaderConfig {
            topic_kind: TopicKind::NoKey,
            qos: ReaderQosBuilder::new()
                .reliability(reliability)
                .history(KEEP_ALL)
                .build(),
            attributes: ReaderAttributes::default(),
        },
        Some(reader_status_sender),
    );
    let writer_guid = writer.lock().guid();
    let reader_guid = reader.lock().guid();
    publisher
        .match_reader(
            writer_guid,
            subscriber
                .reader_proxy_data(reader_guid)
                .expect("reader was just created"),
        )
        .expect("couldn't match reader");
    subscriber
        .match_writer(
            reader_guid,
            publisher
                .writer_proxy_data(writer_guid)
                .expect("writer was just created"),
        )
        .expect("couldn't match writer");

    let poll = Poll::new().unwrap();
    let mut write_timer = Timer::default();
    write_timer.set_timeout(Duration::from_millis(interval), ());
    poll.register(&write_timer, WRITE_TIMER, Ready::readable(), PollOpt::edge())
        .unwrap();
    poll.register(
        &writer_status,
        WRITER_STATUS,
        Ready::readable(),
        PollOpt::edge(),
    )
    .unwrap();
    poll.register(
        &reader_status,
        READER_STATUS,
        Ready::readable(),
        PollOpt::edge(),
    )
    .unwrap();

    let mut shape = Shape {
        color: "BLUE".to_string(),
        x: 0,
        y: 0,
        shapesize: 30,
    };
    let mut written = 0;
    let mut received = 0;
    let mut events = Events::with_capacity(128);
    while received < count {
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        if events.is_empty() {
            println!("timed out: received {} of {} samples", received, count);
            break;
        }
        for event in events.iter() {
            match event.token() {
                WRITE_TIMER => {
                    while write_timer.poll().is_some() {}
                    if written >= count {
                        continue;
                    }
                    shape.x = small_rng.gen_range(0..=225);
                    shape.y = small_rng.gen_range(0..=225);
                    let serialized = cdr::serialize::<_, _, cdr::CdrLe>(&shape, cdr::Infinite)
                        .expect("couldn't serialize shape");
                    let payload = SerializedPayload::from_bytes(&Bytes::from(serialized))
                        .expect("cdr output carries an encapsulation header");
                    match writer.write(ChangeKind::Alive, Some(payload), InstanceHandle::NIL, None)
                    {
                        Ok(seq_num) => {
                            written += 1;
                            println!("wrote {:?} as {:?}", shape, seq_num);
                        }
                        Err(e) => eprintln!("write failed: {}", e),
                    }
                    if written < count {
                        write_timer.set_timeout(Duration::from_millis(interval), ());
                    }
                }
                WRITER_STATUS => {
                    while let Ok(status) = writer_status.try_recv() {
                        match status {
                            DataWriterStatusChanged::PublicationMatched(s) => {
                                println!("publication matched: current {}", s.current_count)
                            }
                            DataWriterStatusChanged::ChangeReceivedByAll(seq_num) => {
                                println!("acknowledged by all up to {:?}", seq_num)
                            }
                        }
                    }
                }
                READER_STATUS => {
                    while let Ok(status) = reader_status.try_recv() {
                        match status {
                            DataReaderStatusChanged::NewCacheChangeAdded { .. } => {
                                for change in reader.lock().take_changes() {
                                    let Some(payload) = change.data_value() else {
                                        continue;
                                    };
                                    match cdr::deserialize::<Shape>(&payload.to_bytes()) {
                                        Ok(shape) => {
                                            received += 1;
                                            println!(
                                                "received {:?} as {:?}",
                                                shape, change.sequence_number
                                            );
                                        }
                                        Err(e) => eprintln!("couldn't deserialize: {}", e),
                                    }
                                }
                            }
                            DataReaderStatusChanged::SubscriptionMatched(s) => {
                                println!("subscription matched: current {}", s.current_count)
                            }
                            DataReaderStatusChanged::SampleLost { writer, count } => {
                                println!("lost {} samples of {}", count, writer)
                            }
                        }
                    }
                }
                _ => unreachable!(),
            }
        }
    }

    if writer.wait_for_all_acked(Duration::from_secs(2)) {
        println!("all samples acknowledged");
    } else {
        println!("not every sample was acknowledged");
    }
}
