//! Incremental Server-Sent-Events framing : turns a byte stream into
//! complete `(event, data)` frames without assuming any single `recv` call
//! lines up with a frame boundary.

/// One complete SSE frame.
#[ derive( Debug, Clone, PartialEq, Eq ) ]
pub struct SseEvent
{
  /// The `event:` field, when the server sent one. Absent means `"message"`
  /// per the SSE spec's default.
  pub event : Option< String >,
  /// Every `data:` line's value, newline-joined, with the trailing newline
  /// the spec adds after the last line stripped.
  pub data : String,
  /// The `id:` field, when present; carried by [`super::recovery`] as the
  /// `Last-Event-ID` to send on reconnect.
  pub id : Option< String >,
}

/// Scans a growing byte buffer for complete frames. Feed it bytes as they
/// arrive off the wire; each call returns every frame that became complete
/// since the last call, leaving a partial trailing frame buffered for next
/// time.
#[ derive( Debug, Default ) ]
pub struct SseFramer
{
  buffer : String,
}

impl SseFramer
{
  /// A framer with an empty buffer.
  #[ must_use ]
  pub fn new() -> Self
  {
    Self::default()
  }

  /// Append `bytes` to the internal buffer and return every frame that
  /// completed as a result. Invalid UTF-8 is replaced lossily rather than
  /// dropped, since a provider splitting a multi-byte character across two
  /// TCP segments is a transport artifact, not a malformed frame.
  pub fn feed( &mut self, bytes : &[ u8 ] ) -> Vec< SseEvent >
  {
    self.buffer.push_str( &String::from_utf8_lossy( bytes ) );
    let mut events = Vec::new();

    loop
    {
      let Some( boundary ) = find_frame_boundary( &self.buffer ) else { break };
      let ( frame, rest ) = self.buffer.split_at( boundary.0 );
      let frame = frame.to_string();
      let remainder = rest[ boundary.1.. ].to_string();
      if let Some( event ) = parse_frame( &frame )
      {
        events.push( event );
      }
      self.buffer = remainder;
    }
    events
  }
}

/// Returns `(frame_end, total_consumed)` for the first `\n\n` or `\r\n\r\n`
/// boundary in `buffer`, if any.
fn find_frame_boundary( buffer : &str ) -> Option< ( usize, usize ) >
{
  if let Some( index ) = buffer.find( "\r\n\r\n" )
  {
    return Some( ( index, index + 4 ) );
  }
  if let Some( index ) = buffer.find( "\n\n" )
  {
    return Some( ( index, index + 2 ) );
  }
  None
}

fn parse_frame( frame : &str ) -> Option< SseEvent >
{
  let mut event = None;
  let mut id = None;
  let mut data_lines = Vec::new();

  for line in frame.split( '\n' )
  {
    let line = line.strip_suffix( '\r' ).unwrap_or( line );
    if line.is_empty() || line.starts_with( ':' )
    {
      continue;
    }
    let ( field, value ) = match line.split_once( ':' )
    {
      Some( ( f, v ) ) => ( f, v.strip_prefix( ' ' ).unwrap_or( v ) ),
      None => ( line, "" ),
    };
    match field
    {
      "event" => event = Some( value.to_string() ),
      "data" => data_lines.push( value.to_string() ),
      "id" => id = Some( value.to_string() ),
      _ => {}
    }
  }

  if data_lines.is_empty() && event.is_none()
  {
    return None;
  }
  Some( SseEvent { event, data : data_lines.join( "\n" ), id } )
}

#[ cfg( test ) ]
mod tests
{
  use super::*;

  #[ test ]
  fn single_frame_in_one_feed()
  {
    let mut framer = SseFramer::new();
    let events = framer.feed( b"event: message\ndata: hello\n\n" );
    assert_eq!( events.len(), 1 );
    assert_eq!( events[ 0 ].event.as_deref(), Some( "message" ) );
    assert_eq!( events[ 0 ].data, "hello" );
  }

  #[ test ]
  fn frame_split_across_feeds()
  {
    let mut framer = SseFramer::new();
    assert!( framer.feed( b"data: par" ).is_empty() );
    let events = framer.feed( b"tial\n\n" );
    assert_eq!( events.len(), 1 );
    assert_eq!( events[ 0 ].data, "partial" );
  }

  #[ test ]
  fn multi_line_data_is_newline_joined()
  {
    let mut framer = SseFramer::new();
    let events = framer.feed( b"data: line one\ndata: line two\n\n" );
    assert_eq!( events[ 0 ].data, "line one\nline two" );
  }

  #[ test ]
  fn comment_lines_are_ignored()
  {
    let mut framer = SseFramer::new();
    let events = framer.feed( b": keep-alive\ndata: payload\n\n" );
    assert_eq!( events.len(), 1 );
    assert_eq!( events[ 0 ].data, "payload" );
  }

  #[ test ]
  fn two_frames_in_one_feed()
  {
    let mut framer = SseFramer::new();
    let events = framer.feed( b"data: one\n\ndata: two\n\n" );
    assert_eq!( events.len(), 2 );
    assert_eq!( events[ 0 ].data, "one" );
    assert_eq!( events[ 1 ].data, "two" );
  }
}
