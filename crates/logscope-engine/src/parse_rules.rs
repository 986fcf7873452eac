//! Parsing rules shipped to the log collector
//!
//! The text is opaque to the engine; it only ends up under the
//! `fluentd.conf` key of the workload's ConfigMap.

/// Rules for domain servers writing log files into a shared volume
pub const DOMAIN_PARSE_RULES: &str = r##"<match fluent.**>
  @type null
</match>
<source>
  @type tail
  path "#{ENV['LOG_PATH']}"
  pos_file /tmp/server.log.pos
  read_from_head true
  tag "#{ENV['DOMAIN_UID']}"
  <parse>
    @type multiline
    format_firstline /^####/
    format1 /^####<(?<timestamp>(.*?))>/
    format2 / <(?<level>(.*?))>/
    format3 / <(?<subSystem>(.*?))>/
    format4 / <(?<serverName>(.*?))>/
    format5 / <(?<serverName2>(.*?))>/
    format6 / <(?<threadName>(.*?))>/
    format7 / <(?<info1>(.*?))>/
    format8 / <(?<info2>(.*?))>/
    format9 / <(?<info3>(.*?))>/
    format10 / <(?<sequenceNumber>(.*?))>/
    format11 / <(?<severity>(.*?))>/
    format12 / <(?<messageID>(.*?))>/
    format13 / <(?<message>(.*?))>/
  </parse>
</source>
<filter **>
  @type record_transformer
  <record>
    domainUID "#{ENV['DOMAIN_UID']}"
    serverName "#{ENV['SERVER_NAME']}"
    namespace "#{ENV['NAMESPACE']}"
    cluster "#{ENV['CLUSTER_NAME']}"
  </record>
</filter>
<match **>
  @type elasticsearch
  hosts "#{ENV['ELASTICSEARCH_URL']}"
  ca_file /fluentd/secret/ca-bundle
  user "#{ENV['ELASTICSEARCH_USER']}"
  password "#{ENV['ELASTICSEARCH_PASSWORD']}"
  index_name "#{ENV['NAMESPACE']}-#{ENV['APP_CONF_NAME']}-#{ENV['COMPONENT_NAME']}"
  include_timestamp true
  flush_interval 10s
</match>
"##;

/// Rules shared by every container-log workload
pub const CONTAINER_BASE_RULES: &str = r##"<label @FLUENT_LOG>
  <match fluent.*>
    @type stdout
  </match>
</label>
<filter **>
  @type parser
  key_name log
  <parse>
    @type grok
    <grok>
      name timestamped-pattern
      pattern %{DATESTAMP:timestamp} %{DATA:loglevel} %{DATA:subsystem} %{DATA:thread} %{GREEDYDATA:message}
    </grok>
    <grok>
      name catchall-pattern
      pattern %{GREEDYDATA:message}
    </grok>
    time_key timestamp
    keep_time_key true
  </parse>
</filter>
"##;

/// Tail/filter/match section for one application container
pub fn container_rules(workload: &str, container: &str) -> String {
    let tag = format!("{workload}-{container}");
    format!(
        r##"<source>
  @type tail
  path "/var/log/containers/#{{ENV['WORKLOAD_NAME']}}*{container}*.log"
  pos_file "/tmp/#{{ENV['WORKLOAD_NAME']}}-{container}.log.pos"
  read_from_head true
  tag {tag}
  <parse>
    @type multi_format
    <pattern>
      format json
      time_format %Y-%m-%dT%H:%M:%S.%NZ
    </pattern>
    <pattern>
      format regexp
      expression /^(?<timestamp>(.*?)) (?<stream>stdout|stderr) (?<log>.*)$/
      time_format %Y-%m-%dT%H:%M:%S.%N%:z
    </pattern>
  </parse>
</source>
<filter {tag}>
  @type record_transformer
  <record>
    oam.applicationconfiguration.namespace "#{{ENV['NAMESPACE']}}"
    oam.applicationconfiguration.name "#{{ENV['APP_CONF_NAME']}}"
    oam.component.name "#{{ENV['COMPONENT_NAME']}}"
    oam.container.name "{container}"
    cluster.name "#{{ENV['CLUSTER_NAME']}}"
  </record>
</filter>
<match {tag}>
  @type elasticsearch
  hosts "#{{ENV['ELASTICSEARCH_URL']}}"
  ca_file /fluentd/secret/ca-bundle
  user "#{{ENV['ELASTICSEARCH_USER']}}"
  password "#{{ENV['ELASTICSEARCH_PASSWORD']}}"
  index_name "#{{ENV['NAMESPACE']}}-#{{ENV['APP_CONF_NAME']}}-#{{ENV['COMPONENT_NAME']}}-{container}"
  include_timestamp true
  flush_interval 10s
</match>
"##
    )
}

/// Full rule set for a container-log workload with the given app containers
pub fn container_workload_rules(workload: &str, containers: &[String]) -> String {
    containers
        .iter()
        .fold(CONTAINER_BASE_RULES.to_string(), |mut rules, container| {
            rules.push_str(&container_rules(workload, container));
            rules
        })
}
